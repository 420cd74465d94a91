use proptest::prelude::*;
use sqlstencil::{Context, ParamStyle, QueryEngine, RenderOptions, Value};

proptest! {
    #[test]
    fn plain_text_renders_unchanged(text in "[A-Za-z0-9 _,.=*'()<>%#-]{0,80}") {
        let engine = QueryEngine::new();
        let query = engine.render_str(&text, &Context::new()).unwrap();
        prop_assert_eq!(query.query, text);
        prop_assert!(query.params.is_empty());
    }

    #[test]
    fn one_placeholder_per_parameter(
        values in prop::collection::vec(any::<i64>(), 0..12),
        style_name in prop::sample::select(ParamStyle::NAMES),
    ) {
        let engine = QueryEngine::new();
        let options = RenderOptions::new().with_style(style_name.parse().unwrap());
        let ctx = Context::new().with("vs", values.clone());
        let query = engine
            .render_str_with("{% for v in vs %}{{ v }},{% endfor %}", &ctx, &options)
            .unwrap();

        let placeholders: Vec<&str> = query.query.split_terminator(',').collect();
        prop_assert_eq!(placeholders.len(), values.len());
        prop_assert!(placeholders.iter().all(|p| !p.is_empty()));
        prop_assert_eq!(query.params.len(), values.len());
        let expected: Vec<Value> = values.into_iter().map(Value::from).collect();
        prop_assert_eq!(query.params.into_positional(), expected);
    }

    #[test]
    fn rendering_is_repeatable(a in any::<i64>(), b in "\\PC{0,20}", flag in any::<bool>()) {
        let mut engine = QueryEngine::new();
        engine
            .add_template("q", "SELECT {{ a }}{% if flag %}, {{ b }}{% endif %} FROM t")
            .unwrap();
        let ctx = Context::new().with("a", a).with("b", b).with("flag", flag);

        let first = engine.render("q", &ctx).unwrap();
        let second = engine.render("q", &ctx).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn values_never_reach_query_text(value in "\\PC{1,40}") {
        let engine = QueryEngine::new();
        let ctx = Context::new().with("v", value.clone());
        let query = engine.render_str("WHERE x = {{ v }}", &ctx).unwrap();

        prop_assert_eq!(query.query, "WHERE x = :v");
        prop_assert_eq!(query.params.get("v"), Some(&Value::from(value)));
    }

    #[test]
    fn quoted_identifiers_cannot_break_out(name in "\\PC{1,40}") {
        let engine = QueryEngine::new();
        let ctx = Context::new().with("t", name.clone());
        let query = engine.render_str("SELECT * FROM {{ t | identifier }}", &ctx).unwrap();

        let expected = format!("SELECT * FROM \"{}\"", name.replace('"', "\"\""));
        prop_assert_eq!(query.query, expected);
        prop_assert!(query.params.is_empty());
    }

    #[test]
    fn repeated_names_get_suffixes(count in 1usize..8) {
        let engine = QueryEngine::new();
        let source = vec!["{{ a }}"; count].join(" ");
        let query = engine
            .render_str(&source, &Context::new().with("a", 1))
            .unwrap();

        let expected: Vec<String> = (0..count)
            .map(|i| if i == 0 { ":a".to_string() } else { format!(":a_{}", i) })
            .collect();
        prop_assert_eq!(query.query, expected.join(" "));
        prop_assert_eq!(query.params.len(), count);
    }
}
