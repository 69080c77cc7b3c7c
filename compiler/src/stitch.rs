// stitch.rs — Substitute generated sections into a target template
//
// A target template is plain text with `%%token%%` placeholders. Domain
// sections are addressed as `%%<Domain>:<section>%%`; program-wide groups
// as `%%includes%%` and `%%initializations%%`.
//
// Preconditions: `generated` comes from a successful `generate` call.
// Postconditions: every known token is replaced; unknown tokens stay in
//                 the text and are reported once each.
// Failure modes: none (leftovers are warnings).
// Side effects: log output only.

use crate::diag::{codes, Diagnostic, Location};
use crate::generate::GeneratedProgram;

#[derive(Debug)]
pub struct StitchResult {
    pub text: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// Replace every recognised `%%token%%` in `template`.
pub fn stitch(template: &str, generated: &GeneratedProgram) -> StitchResult {
    let mut text = String::with_capacity(template.len());
    let mut leftovers: Vec<String> = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find("%%") {
        let after = &rest[start + 2..];
        let Some(len) = after.find("%%") else {
            break;
        };
        let token = &after[..len];
        text.push_str(&rest[..start]);
        match section(token, generated) {
            Some(code) => text.push_str(&code),
            None => {
                text.push_str(&rest[start..start + len + 4]);
                if !leftovers.iter().any(|l| l == token) {
                    leftovers.push(token.to_string());
                }
            }
        }
        rest = &after[len + 2..];
    }
    text.push_str(rest);

    let diagnostics = leftovers
        .into_iter()
        .map(|token| {
            log::warn!("template token %%{}%% left unsubstituted", token);
            Diagnostic::warning(
                codes::W0302,
                Location::default(),
                format!("template token '%%{}%%' has no generated section", token),
            )
        })
        .collect();
    StitchResult { text, diagnostics }
}

fn section(token: &str, generated: &GeneratedProgram) -> Option<String> {
    let groups = &generated.global_groups;
    match token {
        "includes" => {
            return Some(
                groups
                    .include
                    .iter()
                    .map(|i| format!("#include {}\n", include_spelling(i)))
                    .collect(),
            )
        }
        "initializations" => {
            return Some(groups.initializations.iter().map(|l| format!("{}\n", l)).collect())
        }
        _ => {}
    }

    let (domain, part) = token.split_once(':')?;
    if domain.is_empty() {
        return None;
    }
    // A domain with no generated code stitches to nothing.
    let code = generated.domains.get(domain).cloned().unwrap_or_default();
    match part {
        "header" => Some(code.header_code),
        "init" => Some(code.init_code),
        "processing" => Some(code.processing_text()),
        "preprocessing" => Some(code.preprocessing_code),
        "postprocessing" => Some(code.postprocessing_code),
        _ => None,
    }
}

/// `<cmath>` and `"x.h"` are kept; bare names are quoted.
fn include_spelling(include: &str) -> String {
    if include.starts_with('<') || include.starts_with('"') {
        include.to_string()
    } else {
        format!("\"{}\"", include)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::DomainCode;

    fn program() -> GeneratedProgram {
        let mut g = GeneratedProgram::default();
        g.domains.insert(
            "AudioDomain".into(),
            DomainCode {
                header_code: "float gain = 0.00000000;\n".into(),
                init_code: "gain = 1.00000000;\n".into(),
                processing_code: vec!["out = gain;\n".into()],
                ..DomainCode::default()
            },
        );
        g.global_groups.include.push("<cmath>".into());
        g.global_groups.include.push("Gamma/Osc.h".into());
        g.global_groups.initializations.push("srand(0);".into());
        g
    }

    #[test]
    fn replaces_domain_sections() {
        let r = stitch(
            "%%AudioDomain:header%%void init() {\n%%AudioDomain:init%%}\nvoid cb() {\n%%AudioDomain:processing%%}\n",
            &program(),
        );
        assert!(r.diagnostics.is_empty());
        assert_eq!(
            r.text,
            "float gain = 0.00000000;\nvoid init() {\ngain = 1.00000000;\n}\nvoid cb() {\nout = gain;\n}\n"
        );
    }

    #[test]
    fn replaces_global_groups() {
        let r = stitch("%%includes%%--\n%%initializations%%", &program());
        assert_eq!(
            r.text,
            "#include <cmath>\n#include \"Gamma/Osc.h\"\n--\nsrand(0);\n"
        );
    }

    #[test]
    fn unknown_domain_is_empty() {
        let r = stitch("[%%ControlDomain:processing%%]", &program());
        assert_eq!(r.text, "[]");
        assert!(r.diagnostics.is_empty());
    }

    #[test]
    fn leftover_tokens_are_kept_and_reported_once() {
        let r = stitch("%%sampleRate%% %%sampleRate%% %%AudioDomain:bogus%%", &program());
        assert_eq!(r.text, "%%sampleRate%% %%sampleRate%% %%AudioDomain:bogus%%");
        assert_eq!(r.diagnostics.len(), 2);
        assert!(r.diagnostics.iter().all(|d| d.code == Some(codes::W0302)));
    }

    #[test]
    fn unterminated_marker_is_literal() {
        let r = stitch("a %% b", &program());
        assert_eq!(r.text, "a %% b");
    }
}
