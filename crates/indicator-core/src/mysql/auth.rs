//! `mysql_native_password` challenge response.

use sha1::{Digest, Sha1};

/// Length of the scramble and of the digest.
pub const SCRAMBLE_LEN: usize = 20;

/// Name of the only authentication plugin this client speaks.
pub const NATIVE_PASSWORD_PLUGIN: &str = "mysql_native_password";

/// Compute `SHA1(password) XOR SHA1(scramble ++ SHA1(SHA1(password)))`.
#[must_use]
pub fn native_password(password: &[u8], scramble: &[u8; SCRAMBLE_LEN]) -> [u8; SCRAMBLE_LEN] {
    let stage1 = Sha1::digest(password);
    let stage2 = Sha1::digest(&stage1);

    let mut hasher = Sha1::new();
    hasher.update(scramble);
    hasher.update(&stage2);
    let stage3 = hasher.finalize();

    let mut out = [0u8; SCRAMBLE_LEN];
    for (o, (a, b)) in out.iter_mut().zip(stage1.iter().zip(stage3.iter())) {
        *o = a ^ b;
    }
    out
}
