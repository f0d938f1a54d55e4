pub mod fingerprint;
pub mod health;
pub mod info;
pub mod serve;
