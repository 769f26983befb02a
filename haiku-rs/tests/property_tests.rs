use proptest::prelude::*;
use serde_json::json;

use haiku::script::ast::Stmt;
use haiku::script::expand::infer;
use haiku::script::lexer::{tokenize, TokenKind};
use haiku::script::{parse, Evaluator, Value};

fn count(src: &str, kind: TokenKind) -> usize {
    tokenize(src).iter().filter(|t| t.kind == kind).count()
}

/// Lines of words at arbitrary indentation, including ragged dedents.
fn indented_program() -> impl Strategy<Value = String> {
    prop::collection::vec((0usize..12, "[a-z]{1,6}"), 0..40).prop_map(|lines| {
        lines
            .into_iter()
            .map(|(indent, word)| format!("{}{word}\n", " ".repeat(indent)))
            .collect()
    })
}

proptest! {
    /// The parser returns Ok or Err on any input but never panics.
    #[test]
    fn parser_does_not_panic(s in "\\PC*") {
        let _ = parse(&s);
    }

    /// Same, over inputs built from the language's own punctuation.
    #[test]
    fn parser_does_not_panic_on_near_programs(
        s in r#"([ \t\n]|get|for|\$[a-z_]+|"[a-z$/]*"|[0-9]+|@[a-z]+|\?|:|---|parallel|in|if|else|==|>|\+|`[a-z]*`|json)*"#
    ) {
        let _ = parse(&s);
    }

    #[test]
    fn indents_and_dedents_balance(src in indented_program()) {
        prop_assert_eq!(count(&src, TokenKind::Indent), count(&src, TokenKind::Dedent));
    }

    #[test]
    fn integers_infer_as_integers(n in any::<i64>()) {
        prop_assert_eq!(infer(&n.to_string()), Value::Int(n));
    }

    #[test]
    fn plain_words_stay_strings(w in "[g-mo-su-z][a-z]{0,10}") {
        prop_assert_eq!(infer(&w), Value::Str(w.clone()));
    }

    /// A bare body scalar reaches the descriptor's JSON with its inferred type.
    #[test]
    fn body_scalars_serialize_with_inferred_type(n in any::<i64>(), flag in any::<bool>()) {
        let src = format!("post \"https://x\"\nbody\n  n {n}\n  flag {flag}\n");
        let program = parse(&src).unwrap();
        let Stmt::Request(req) = &program.statements[0] else {
            panic!("expected a request, got {:?}", program.statements[0]);
        };
        let desc = Evaluator::new().build_request(req).unwrap();
        let body = serde_json::to_value(&desc).unwrap()["body"].clone();
        prop_assert_eq!(body, json!({"n": n, "flag": flag}));
    }
}
