//! Archive names for dispatched files

use rand::Rng;

const SUFFIX_LEN: usize = 5;
const SUFFIX_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// `<stem>_<SUFFIX>.<ext>`, or `<name>_<SUFFIX>` without an extension
///
/// The suffix is random so repeated sends of one filename do not collide in
/// the archive folder.
pub fn archive_filename(filename: &str) -> String {
    let suffix = random_suffix(&mut rand::rng());
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}_{}.{}", stem, suffix, ext),
        _ => format!("{}_{}", filename, suffix),
    }
}

fn random_suffix<R: Rng>(rng: &mut R) -> String {
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_CHARS[rng.random_range(0..SUFFIX_CHARS.len())] as char)
        .collect()
}
