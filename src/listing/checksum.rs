use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use blake3::Hasher;

/// Algorithm tag at the front of every checksum we produce.
pub const CHECKSUM_PREFIX: &str = "blake3$";

/// Hash the contents of the file at `path`, e.g. `blake3$af1349b9...`.
pub fn checksum_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Hasher::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{CHECKSUM_PREFIX}{}", hasher.finalize().to_hex()))
}
