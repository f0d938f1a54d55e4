/*! Integration tests for the keyserver kernel.
 *
 * This test suite is organized as a single integration test binary
 * following the pattern described by matklad in
 * https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html
 *
 * The module structure mirrors the main library structure:
 * - authority: TLS and SSH signing, verification and loading
 * - token: bootstrap token lifecycle
 * - account: group closure and metadata substitution
 * - grant: grant field validation and compilation
 * - admit: the fingerprint admission protocol
 * - config: loading policy documents from disk
 * - context: authentication and batched dispatch over a compiled policy
 */

use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("keyserver=info".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

mod admit;
mod authority;
mod config;
mod helpers;
mod token;
