//! Turns the displayed markup of a sample back into source text and instruments its output
//! calls so that they report into the sample's result region.

use lazy_static::lazy_static;
use regex::Regex;

pub const DEFAULT_LOG_CALL: &str = "console.log";

lazy_static! {
    static ref MARKUP_REG: Regex =
        Regex::new(r"(?s)<.+?>").expect("Failed to init regex for stripping markup");
}

/// Removes every `<...>` span, tags produced by the highlighter included.
pub fn strip_markup(code: &str) -> String {
    MARKUP_REG.replace_all(code, "").into_owned()
}

pub fn decode_entities(text: &str) -> String {
    html_escape::decode_html_entities(text).into_owned()
}

/// Converts the markup of the sample at `index` into a runnable script.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeConverter {
    index: usize,
    log_call: String,
}

impl CodeConverter {
    pub fn new(index: usize) -> Self {
        Self::with_log_call(index, DEFAULT_LOG_CALL)
    }

    pub fn with_log_call(index: usize, log_call: &str) -> Self {
        Self {
            index,
            log_call: log_call.to_string(),
        }
    }

    /// Strip, decode, instrument. The order matters: entity sequences are only contiguous once
    /// the markup is gone, and the call scanner needs decoded text.
    pub fn convert(&self, code: &str) -> String {
        let text = strip_markup(code);
        let text = decode_entities(&text);
        self.instrument(&text)
    }

    /// Rewrites every output call into a `void` expression, so a rewritten call never continues
    /// the expression of a previous line that has no semicolon. The first call also clears the
    /// region, once per run even when it sits in a function or a loop.
    pub fn instrument(&self, code: &str) -> String {
        let calls = find_calls(code, &self.log_call);
        if calls.is_empty() {
            return code.to_string();
        }

        let mut result = String::with_capacity(code.len() + calls.len() * 256);
        let mut last = 0;
        for (position, call) in calls.iter().enumerate() {
            result.push_str(&code[last..call.start]);
            let guarded = self.guarded(code[call.open + 1..call.close].trim());
            if position == 0 {
                result.push_str(&format!("void ({}, {guarded})", self.clear_once()));
            } else {
                result.push_str(&format!("void {guarded}"));
            }
            last = call.close + 1;
        }
        result.push_str(&code[last..]);
        result
    }

    /// Clears the region unless this run already did. Runtimes reset the flag before each run.
    fn clear_once(&self) -> String {
        format!(
            "(globalThis.{flag} || (globalThis.{flag} = true, clearResult({index})))",
            flag = cleared_flag(self.index),
            index = self.index,
        )
    }

    /// A single expression evaluating `expr` once and reporting either its value or the error
    /// it threw. Being an expression it stays valid wherever the original call was.
    fn guarded(&self, expr: &str) -> String {
        let label = serde_json::Value::String(expr.to_string()).to_string();
        let expr = if expr.is_empty() { "undefined" } else { expr };
        format!(
            "((label) => {{ try {{ const value = ({expr}\n); addResult({index}, label + \" -> \" + (value !== null && typeof value === \"object\" && (typeof window === \"undefined\" || value !== window) ? JSON.stringify(value) : value)); }} catch (error) {{ addResult({index}, label + \" -> \" + error); }} }})({label})",
            index = self.index,
        )
    }
}

/// Global set by the first instrumented call of sample `index` once it cleared the region.
pub fn cleared_flag(index: usize) -> String {
    format!("__liverunCleared{index}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Call {
    start: usize,
    open: usize,
    close: usize,
}

/// Finds every `callee(...)` call outside of strings and comments. Scanning stops at the first
/// call without a matching `)`, leaving the rest of the text untouched.
fn find_calls(code: &str, callee: &str) -> Vec<Call> {
    let bytes = code.as_bytes();
    let needle = callee.as_bytes();
    let mut calls = Vec::new();
    if needle.is_empty() {
        return calls;
    }

    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' | b'`' => i = skip_string(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'/') => i = skip_line_comment(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
            _ if bytes[i..].starts_with(needle) && is_boundary(bytes, i) => {
                let mut open = i + needle.len();
                while open < bytes.len() && bytes[open].is_ascii_whitespace() {
                    open += 1;
                }
                if bytes.get(open) != Some(&b'(') {
                    i += needle.len();
                    continue;
                }
                match matching_paren(bytes, open) {
                    Some(close) => {
                        calls.push(Call {
                            start: i,
                            open,
                            close,
                        });
                        i = close + 1;
                    }
                    None => break,
                }
            }
            _ => i += 1,
        }
    }
    calls
}

fn is_boundary(bytes: &[u8], at: usize) -> bool {
    match at.checked_sub(1).map(|prev| bytes[prev]) {
        None => true,
        Some(prev) => !(prev.is_ascii_alphanumeric() || prev == b'_' || prev == b'$' || prev == b'.'),
    }
}

/// Returns the index right after the literal starting at `start`.
fn skip_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return i + 1,
            b'\n' if quote != b'`' => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn skip_line_comment(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |end| start + end + 1)
}

fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    bytes[start + 2..]
        .windows(2)
        .position(|pair| pair == b"*/")
        .map_or(bytes.len(), |end| start + 2 + end + 2)
}

fn matching_paren(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' | b'`' => {
                i = skip_string(bytes, i);
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                i = skip_line_comment(bytes, i);
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_block_comment(bytes, i);
                continue;
            }
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_strip_markup() {
        let markup = r#"<span class="hl-source">console.<span>log</span>(1)</span>"#;
        assert_eq!(strip_markup(markup), "console.log(1)");
        assert_eq!(strip_markup("<pre\nclass=\"x\">a</pre>"), "a");
    }

    #[test]
    pub fn test_strip_markup_is_idempotent() {
        let inputs = [
            "<b>bold</b> text",
            "<<a>>",
            "a <> b > c",
            "1 &lt; 2 <i>x</i> <",
            "<a<b>>c>",
            "no markup at all",
        ];
        for input in inputs {
            let once = strip_markup(input);
            assert_eq!(strip_markup(&once), once, "input: {input}");
        }
    }

    #[test]
    pub fn test_decode_entities() {
        assert_eq!(decode_entities("1 &lt; 2 &amp;&amp; 3 &gt; 2"), "1 < 2 && 3 > 2");
        assert_eq!(decode_entities("&quot;a&quot; &#39;b&#39; &#x41;"), "\"a\" 'b' A");
    }

    #[test]
    pub fn test_entities_decoded_after_stripping() {
        let converter = CodeConverter::new(0);
        assert_eq!(
            converter.convert("<span>if (a &lt;</span><span> b) {}</span>"),
            "if (a < b) {}"
        );
    }

    #[test]
    pub fn test_no_log_call_passes_through() {
        let converter = CodeConverter::new(3);
        let code = "const a = 1;\nconst b = a + 1;\n";
        assert_eq!(converter.instrument(code), code);
    }

    #[test]
    pub fn test_first_call_clears_region() {
        let converter = CodeConverter::new(4);
        let code = converter.instrument("console.log(1)\nconsole.log(2)");
        assert!(code.starts_with(
            "void ((globalThis.__liverunCleared4 || (globalThis.__liverunCleared4 = true, clearResult(4))), ((label) =>"
        ));
        assert_eq!(code.matches("clearResult(").count(), 1);
        assert_eq!(code.matches("})(\"1\")").count(), 1);
        assert_eq!(code.matches("})(\"2\")").count(), 1);
    }

    #[test]
    pub fn test_rewritten_calls_start_with_void() {
        let converter = CodeConverter::new(0);
        let code = converter.instrument("const a = 1\nconsole.log(a)\nconsole.log(2)");
        assert!(code.starts_with("const a = 1\nvoid ((globalThis."), "{code}");
        assert!(code.contains("\nvoid ((label) =>"), "{code}");
        assert_eq!(code.matches("void ").count(), 2);
    }

    #[test]
    pub fn test_nested_and_multiline_calls() {
        let calls = find_calls("console.log(f(a, (b)),\n  c)\nx", "console.log");
        assert_eq!(
            calls,
            vec![Call {
                start: 0,
                open: 11,
                close: 26
            }]
        );
    }

    #[test]
    pub fn test_calls_in_strings_and_comments_are_ignored() {
        let code = "const s = \"console.log(1)\";\n// console.log(2)\n/* console.log(3) */\n`console.log(4)`";
        assert!(find_calls(code, "console.log").is_empty());
        let code = "console.log(\")\")";
        assert_eq!(find_calls(code, "console.log").len(), 1);
    }

    #[test]
    pub fn test_callee_needs_identifier_boundary() {
        assert!(find_calls("myconsole.log(1)", "console.log").is_empty());
        assert!(find_calls("a.console.log(1)", "console.log").is_empty());
        assert!(find_calls("console.logger(1)", "console.log").is_empty());
        assert_eq!(find_calls("console.log (1)", "console.log").len(), 1);
    }

    #[test]
    pub fn test_unterminated_call_passes_through() {
        let converter = CodeConverter::new(0);
        let code = "console.log(1;\nlet a = 2;";
        assert_eq!(converter.instrument(code), code);
    }

    #[test]
    pub fn test_label_is_quoted() {
        let converter = CodeConverter::new(1);
        let code = converter.instrument(r#"console.log("it's")"#);
        assert!(code.ends_with(r#"})("\"it's\""))"#), "{code}");
    }

    #[test]
    pub fn test_empty_call() {
        let converter = CodeConverter::new(0);
        let code = converter.instrument("console.log()");
        assert!(code.contains("const value = (undefined\n);"));
        assert!(code.ends_with("})(\"\"))"));
    }

    #[test]
    pub fn test_custom_log_call() {
        let converter = CodeConverter::with_log_call(2, "log");
        let code = converter.instrument("log(1); console.log(2)");
        assert!(code.starts_with("void ((globalThis.__liverunCleared2 ||"));
        assert!(code.ends_with("; console.log(2)"));
    }

    #[test]
    pub fn test_non_ascii_text() {
        let converter = CodeConverter::new(0);
        let code = converter.instrument("const é = \"ü\"; console.log(é)");
        assert!(code.starts_with("const é = \"ü\"; void ((globalThis.__liverunCleared0"));
        assert!(code.ends_with("})(\"é\"))"));
    }
}
