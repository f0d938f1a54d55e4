//! Constants used throughout the keyserver kernel.

use std::time::Duration;

/// Metadata key that every account carries, holding its own principal.
pub const PRINCIPAL_METADATA_KEY: &str = "principal";

/// Metadata key holding the IP address an account is bound to.
pub const IP_METADATA_KEY: &str = "ip";

/// Smallest RSA modulus, in bits, accepted for admission requests.
pub const MIN_RSA_KEY_BITS: usize = 2048;

/// How long an operator approval of a fingerprint stays valid.
pub const ADMIT_APPROVAL_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Lifespan of certificates issued through the admission protocol.
pub const ADMIT_CERTIFICATE_LIFESPAN: Duration = Duration::from_secs(40 * 24 * 60 * 60);

/// Shortest lifespan any authority will sign for.
pub const MIN_CERTIFICATE_LIFESPAN: Duration = Duration::from_secs(1);

/// Size of TLS certificate serial numbers, in bytes (top bit cleared: 159 bits).
pub const SERIAL_NUMBER_BYTES: usize = 20;

/// Size of bootstrap tokens, in bytes of randomness.
pub const TOKEN_BYTES: usize = 16;

/// Size of the generated server TLS key.
pub const SERVER_KEY_BITS: usize = 2048;

/// Header carrying a bootstrap token.
pub const TOKEN_HEADER: &str = "X-Bootstrap-Token";

/// Header carrying the URL-encoded PEM client certificate chain, set by the
/// TLS-terminating proxy in front of the server.
pub const CLIENT_CERTIFICATE_HEADER: &str = "X-Client-Certificate";

/// Header in which the TLS-terminating proxy appends the client's address.
pub const FORWARDED_FOR_HEADER: &str = "X-Forwarded-For";
