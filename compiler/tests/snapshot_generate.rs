// Snapshot tests: lock generated section text to detect unintended
// behavior changes.
//
// Uses the library API (load → generate) directly. Snapshots are inline
// `insta` snapshots; run `cargo insta review` after intentional output
// changes to update them.

use streamgen::ast::load_program;
use streamgen::code::DomainCode;
use streamgen::generate::{generate, GeneratorOptions};
use streamgen::templates::CppTemplates;

fn audio_section(source: &str) -> DomainCode {
    let program = load_program(source).unwrap_or_else(|e| panic!("bad tree: {}", e));
    let result = generate(&program, &CppTemplates::new(), &GeneratorOptions::default());
    assert!(!result.has_errors(), "generate errors: {:?}", result.diagnostics);
    let mut generated = result.generated.unwrap();
    generated.domains.remove("AudioDomain").unwrap()
}

#[test]
fn snapshot_decimation() {
    let audio = audio_section(
        r#"[
        {"block": {"name": "AudioDomain", "type": "domain", "rate": 100}},
        {"block": {"name": "src", "type": "signal"}},
        {"block": {"name": "slow", "type": "signal", "rate": 50}},
        {"stream": {"members": [{"name": {"name": "src"}}, {"name": {"name": "slow"}}]}}
    ]"#,
    );
    insta::assert_snapshot!(audio.header_code, @r"
    float src = 0.00000000;
    double _AudioDomain_rc_0;
    float slow = 0.00000000;
    ");
    insta::assert_snapshot!(audio.init_code, @"_AudioDomain_rc_0 = 1.00000000;");
    insta::assert_snapshot!(audio.processing_text(), @r"
    if (_AudioDomain_rc_0 >= 1.0) {
        _AudioDomain_rc_0 -= 1.0;
        slow = src;
    }
    _AudioDomain_rc_0 += 0.50000000;
    ");
}

#[test]
fn snapshot_interpolation() {
    let audio = audio_section(
        r#"[
        {"block": {"name": "AudioDomain", "type": "domain", "rate": 100}},
        {"block": {"name": "src", "type": "signal"}},
        {"block": {"name": "fast", "type": "signal", "rate": 400}},
        {"stream": {"members": [{"name": {"name": "src"}}, {"name": {"name": "fast"}}]}}
    ]"#,
    );
    insta::assert_snapshot!(audio.init_code, @"_AudioDomain_rc_0 = 0.00000000;");
    insta::assert_snapshot!(audio.processing_text(), @r"
    while (_AudioDomain_rc_0 < 1.0) {
        fast = src;
        _AudioDomain_rc_0 += 0.25000000;
    }
    _AudioDomain_rc_0 -= 1.0;
    ");
}

#[test]
fn snapshot_nested_guards() {
    let audio = audio_section(
        r#"[
        {"block": {"name": "AudioDomain", "type": "domain", "rate": 100}},
        {"block": {"name": "src", "type": "signal"}},
        {"block": {"name": "a", "type": "signal", "rate": 200}},
        {"block": {"name": "b", "type": "signal", "rate": 400}},
        {"stream": {"members": [{"name": {"name": "src"}}, {"name": {"name": "a"}}, {"name": {"name": "b"}}]}}
    ]"#,
    );
    insta::assert_snapshot!(audio.processing_text(), @r"
    while (_AudioDomain_rc_0 < 1.0) {
        a = src;
        while (_AudioDomain_rc_1 < 1.0) {
            b = a;
            _AudioDomain_rc_1 += 0.50000000;
        }
        _AudioDomain_rc_1 -= 1.0;
        _AudioDomain_rc_0 += 0.50000000;
    }
    _AudioDomain_rc_0 -= 1.0;
    ");
}

#[test]
fn snapshot_loop_function() {
    let audio = audio_section(
        r#"[
        {"block": {"name": "n", "type": "signal"}},
        {"block": {"name": "go", "type": "trigger"}},
        {"block": {"name": "Count", "type": "loop", "terminateWhen": "done",
            "blocks": [{"block": {"name": "done", "type": "switch"}}],
            "streams": [
                {"stream": {"members": [
                    {"expression": {"type": "Add", "left": {"name": {"name": "n"}}, "right": {"value": 1}}},
                    {"name": {"name": "n"}}
                ]}},
                {"stream": {"members": [
                    {"expression": {"type": "GreaterEqual", "left": {"name": {"name": "n"}}, "right": {"value": 10}}},
                    {"name": {"name": "done"}}
                ]}}
            ]}},
        {"stream": {"members": [{"name": {"name": "go"}}, {"name": {"name": "Count"}}]}}
    ]"#,
    );
    let header = &audio.header_code;
    let start = header.find("void Count_loop").unwrap();
    let len = header[start..].find("\n}\n").unwrap() + 3;
    insta::assert_snapshot!(&header[start..start + len], @r"
    void Count_loop(float &n) {
        bool done = false;
        while (!done) {
            n = (n + 1.00000000);
            done = (n >= 10.00000000);
        }
    }
    ");
    insta::assert_snapshot!(audio.processing_text(), @r"
    if (go) {
        Count_loop(n);
    }
    ");
}
