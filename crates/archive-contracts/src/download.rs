use rand::Rng;

pub const DOWNLOAD_PREFIX: &str = "Archive";
pub const DOWNLOAD_FALLBACK_LABEL: &str = "ArchiveItem";

const PROMPT_WORDS: usize = 4;
const SUFFIX_LEN: usize = 6;
const SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// First four space-separated prompt words joined by `_`, keeping only
/// `[A-Za-z0-9_]`. Empty when nothing survives.
pub fn sanitized_prompt_stem(prompt: &str) -> String {
    prompt
        .split(' ')
        .take(PROMPT_WORDS)
        .collect::<Vec<&str>>()
        .join("_")
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .collect()
}

pub fn download_base_name(prompt: &str) -> String {
    let stem = sanitized_prompt_stem(prompt);
    if stem.is_empty() {
        DOWNLOAD_FALLBACK_LABEL.to_string()
    } else {
        stem
    }
}

pub fn random_suffix<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect()
}

/// `Archive_<base>_<suffix>.<ext>`
pub fn download_file_name<R: Rng + ?Sized>(prompt: &str, extension: &str, rng: &mut R) -> String {
    format!(
        "{DOWNLOAD_PREFIX}_{}_{}.{extension}",
        download_base_name(prompt),
        random_suffix(rng)
    )
}
