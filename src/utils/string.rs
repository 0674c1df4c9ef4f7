use cfg_if::cfg_if;

cfg_if! {
    // Node writes `\n` everywhere but the console layer of some runtimes turns it into `\r\n`
    // on Windows; captured text always uses `\n`.
    if #[cfg(target_family = "windows")] {
        pub fn normalize_newlines(text: &str) -> String {
            text.replace("\r\n", "\n")
        }
    } else {
        pub fn normalize_newlines(text: &str) -> String {
            text.to_string()
        }
    }
}

/// The language of a fence info string: its first word, mdbook attributes like `,editable`
/// dropped.
pub fn fence_language(info: &str) -> &str {
    info.split(|c: char| c.is_whitespace() || c == ',')
        .next()
        .unwrap_or_default()
}
