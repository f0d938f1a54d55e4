//! Fingerprint command - prints the word fingerprint an operator approves.

use keyserver::admit::fingerprint_request;

use crate::cli::FingerprintArgs;

pub fn run(args: &FingerprintArgs) -> Result<(), Box<dyn std::error::Error>> {
    let csr = std::fs::read_to_string(&args.csr)?;
    println!("{}", fingerprint_request(&csr)?);
    Ok(())
}
