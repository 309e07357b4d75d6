use proptest::prelude::*;
use script_runner::runtime::instrument_script;

const STATEMENTS: &[&str] = &[
    "print(1);",
    "let a = 1;",
    "a += 2;",
    "let s = \"x;y // not a comment\";",
    "",
    "   ",
    "// comment only",
    "let m = #{ k: 1 };",
    "let list = [1, 2, 3];",
    "let d = a\n    - 1;",
];

fn script() -> impl Strategy<Value = String> {
    (
        prop::collection::vec(prop::sample::select(STATEMENTS), 0..20),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(|(mut lines, tail, wrap)| {
            // Only the last statement of a block may omit its `;`.
            if tail {
                lines.push("total");
            }
            let body = lines.join("\n");
            if wrap {
                format!("if true {{\n{}\n}}\n", body)
            } else {
                body
            }
        })
}

proptest! {
    #[test]
    fn instrumentation_keeps_line_count(source in script()) {
        let instrumented = instrument_script(&source, "main.rhai", false).unwrap();
        prop_assert_eq!(
            instrumented.matches('\n').count(),
            source.matches('\n').count()
        );
    }

    #[test]
    fn instrumented_scripts_compile(source in script()) {
        let instrumented = instrument_script(&source, "main.rhai", true).unwrap();
        let compiled = rhai::Engine::new().compile(&instrumented);
        prop_assert!(compiled.is_ok(), "{:?}\n{}", compiled.err(), instrumented);
    }
}
