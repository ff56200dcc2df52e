//! Minimal macro/conditional preprocessing.
//!
//! Handles object-like `#define`/`#undef` and `#ifdef`/`#ifndef`/`#else`/
//! `#endif` blocks. A raw `#if`/`#elif` block is not evaluated here: its
//! lines pass through untouched when the surrounding context is live, so the
//! section extractor can still classify them. Anything else starting with
//! `#` passes through untouched as well.

use std::collections::HashMap;

/// One `#if*` nesting level.
enum Frame {
    /// Resolved `#ifdef`/`#ifndef` with its current branch state.
    Cond(bool),
    /// Unevaluated raw `#if`; its directives and lines pass through.
    Raw,
}

/// Expand macros and resolve conditional blocks in GLSL source text.
pub fn preprocess(source: &str) -> String {
    let mut defines: HashMap<String, String> = HashMap::new();
    // A line is live iff every resolved frame is true.
    let mut frames: Vec<Frame> = Vec::new();
    let mut out = Vec::new();

    for line in source.lines() {
        let trimmed = line.trim_start();
        let live = frames
            .iter()
            .all(|frame| !matches!(frame, Frame::Cond(false)));

        if let Some(rest) = trimmed.strip_prefix('#') {
            let rest = rest.trim_start();
            let mut words = rest.split_whitespace();

            match words.next() {
                Some("define") if live => {
                    if let Some(name) = words.next() {
                        let value = rest
                            .splitn(3, char::is_whitespace)
                            .nth(2)
                            .unwrap_or("")
                            .trim()
                            .to_owned();
                        defines.insert(name.to_owned(), value);
                    }
                }
                Some("undef") if live => {
                    if let Some(name) = words.next() {
                        defines.remove(name);
                    }
                }
                Some("ifdef") => {
                    let defined = words.next().is_some_and(|name| defines.contains_key(name));
                    frames.push(Frame::Cond(defined));
                }
                Some("ifndef") => {
                    let defined = words.next().is_some_and(|name| defines.contains_key(name));
                    frames.push(Frame::Cond(!defined));
                }
                Some("if") => {
                    if live {
                        out.push(line.to_owned());
                    }
                    frames.push(Frame::Raw);
                }
                Some("elif") => match frames.last_mut() {
                    Some(Frame::Raw) => {
                        if live {
                            out.push(line.to_owned());
                        }
                    }
                    // An `#elif` after a resolved branch closes it.
                    Some(Frame::Cond(state)) => *state = false,
                    None => {}
                },
                Some("else") => match frames.last_mut() {
                    Some(Frame::Cond(state)) => *state = !*state,
                    Some(Frame::Raw) => {
                        if live {
                            out.push(line.to_owned());
                        }
                    }
                    None => {}
                },
                Some("endif") => {
                    if let Some(Frame::Raw) = frames.pop() {
                        let live = frames
                            .iter()
                            .all(|frame| !matches!(frame, Frame::Cond(false)));
                        if live {
                            out.push(line.to_owned());
                        }
                    }
                }
                _ if live => out.push(line.to_owned()),
                _ => {}
            }
        } else if live {
            out.push(expand(line, &defines));
        }
    }

    out.join("\n")
}

/// Word-boundary macro expansion of one line.
fn expand(line: &str, defines: &HashMap<String, String>) -> String {
    if defines.is_empty() {
        return line.to_owned();
    }

    let mut result = String::with_capacity(line.len());
    let mut word = String::new();

    let flush = |word: &mut String, result: &mut String| {
        if !word.is_empty() {
            match defines.get(word.as_str()) {
                Some(value) => result.push_str(value),
                None => result.push_str(word),
            }
            word.clear();
        }
    };

    for c in line.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            word.push(c);
        } else {
            flush(&mut word, &mut result);
            result.push(c);
        }
    }
    flush(&mut word, &mut result);

    result
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn expands_object_macros() {
        let source = "#define PI 3.14159\nfloat x = PI;\nfloat PIE = 1.0;";
        assert_eq!(preprocess(source), "float x = 3.14159;\nfloat PIE = 1.0;");
    }

    #[test]
    fn resolves_conditionals() {
        let source = r#"#define USE_UV
#ifdef USE_UV
in vec2 uv;
#else
in vec2 st;
#endif"#;
        assert_eq!(preprocess(source), "in vec2 uv;");
    }

    #[test]
    fn keeps_unknown_directives() {
        let source = "#version 300 es\n#extension GL_OES_standard_derivatives : enable";
        assert_eq!(preprocess(source), source);
    }

    #[test]
    fn live_numeric_conditionals_pass_through_whole() {
        let source = "#if NUM_LIGHTS > 0\nfloat attenuation;\n#elif defined(FOG)\nfloat fog;\n#else\nfloat unlit;\n#endif";
        assert_eq!(preprocess(source), source);
    }

    #[test]
    fn dead_branches_swallow_nested_numeric_conditionals() {
        let source = r#"#ifdef MISSING
#if NUM_LIGHTS > 0
float attenuation;
#endif
float shaded;
#endif
float always;"#;
        assert_eq!(preprocess(source), "float always;");
    }
}
