//! Authority tests
//!
//! - tls_tests: certificate issuance, verification and the server certificate cache
//! - ssh_tests: OpenSSH certificate issuance
//! - loading_tests: key/certificate pairing checks at load time

mod loading_tests;
mod tls_tests;
