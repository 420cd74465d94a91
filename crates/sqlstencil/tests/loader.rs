use std::fs;
use std::path::Path;

use sqlstencil::{Context, EngineConfig, LoadError, ParamStyle, Params, QueryEngine, QueryError, Value};
use tempfile::TempDir;

fn write(dir: &Path, name: &str, source: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, source).unwrap();
}

fn engine_for(dir: &TempDir) -> QueryEngine {
    let mut engine = QueryEngine::new();
    engine.add_search_path(dir.path()).unwrap();
    engine
}

#[test]
fn test_renders_template_from_search_path() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "users/by_email.sql", "SELECT * FROM users WHERE email = {{ email }}");
    let engine = engine_for(&dir);

    let query = engine
        .render("users/by_email", &Context::new().with("email", "a@b.c"))
        .unwrap();
    assert_eq!(query.query, "SELECT * FROM users WHERE email = :email");

    let by_full_name = engine
        .render("users/by_email.sql", &Context::new().with("email", "a@b.c"))
        .unwrap();
    assert_eq!(by_full_name, query);
}

#[test]
fn test_include_shares_captures() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "filters.sql", "status = {{ status }}");
    write(
        dir.path(),
        "orders.sql",
        "SELECT * FROM orders WHERE id = {{ id }} AND {% include 'filters.sql' %}",
    );
    let engine = engine_for(&dir);
    let ctx = Context::new().with("id", 4).with("status", "open");

    let query = engine
        .render_with(
            "orders",
            &ctx,
            &engine.render_options().with_style(ParamStyle::Asyncpg),
        )
        .unwrap();
    assert_eq!(query.query, "SELECT * FROM orders WHERE id = $1 AND status = $2");
    assert_eq!(
        query.params,
        Params::Positional(vec![Value::from(4), Value::from("open")])
    );
}

#[test]
fn test_extends_fills_blocks() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "base.sql",
        "SELECT * FROM {{ table | identifier }}{% block where %}{% endblock %}",
    );
    write(
        dir.path(),
        "by_id.sql",
        "{% extends 'base.sql' %}{% block where %} WHERE id = {{ id }}{% endblock %}",
    );
    let engine = engine_for(&dir);
    let ctx = Context::new().with("table", "items").with("id", 7);

    let query = engine.render("by_id", &ctx).unwrap();
    assert_eq!(query.query, "SELECT * FROM \"items\" WHERE id = :id");
    assert_eq!(query.params.get("id"), Some(&Value::from(7)));
}

#[test]
fn test_added_template_can_include_file() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "columns.sql", "{{ column | identifier }}");
    let mut engine = engine_for(&dir);
    engine
        .add_template("select", "SELECT {% include 'columns' %} FROM t")
        .unwrap();

    let query = engine
        .render("select", &Context::new().with("column", "name"))
        .unwrap();
    assert_eq!(query.query, "SELECT \"name\" FROM t");
}

#[test]
fn test_template_names() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.sql", "1");
    write(dir.path(), "nested/b.sql.j2", "2");
    write(dir.path(), "notes.txt", "not a template");
    let mut engine = engine_for(&dir);
    engine.add_template("inline", "3").unwrap();

    assert_eq!(
        engine.template_names().unwrap(),
        vec!["a".to_string(), "inline".to_string(), "nested/b".to_string()]
    );
}

#[test]
fn test_earlier_search_path_wins() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    write(first.path(), "q.sql", "SELECT 1");
    write(second.path(), "q.sql", "SELECT 2");

    let mut engine = QueryEngine::new();
    engine.add_search_path(first.path()).unwrap();
    engine.add_search_path(second.path()).unwrap();

    assert_eq!(engine.render("q", &Context::new()).unwrap().query, "SELECT 1");
}

#[test]
fn test_missing_template() {
    let dir = TempDir::new().unwrap();
    let engine = engine_for(&dir);
    let err = engine.render("nope", &Context::new()).unwrap_err();
    assert!(matches!(err, QueryError::TemplateNotFound(ref name) if name == "nope"));
}

#[test]
fn test_missing_search_directory() {
    let dir = TempDir::new().unwrap();
    let mut engine = QueryEngine::new();
    let err = engine.add_search_path(dir.path().join("missing")).unwrap_err();
    assert!(matches!(err, QueryError::Load(LoadError::DirectoryNotFound { .. })));
}

#[test]
fn test_parent_directory_names_are_rejected() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "inner/q.sql", "SELECT 1");
    let mut engine = QueryEngine::new();
    engine.add_search_path(dir.path().join("inner")).unwrap();

    let err = engine.render("../inner/q", &Context::new()).unwrap_err();
    assert!(matches!(err, QueryError::Load(LoadError::InvalidName { .. })));
}

#[test]
fn test_syntax_error_in_file() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "broken.sql", "SELECT {{ a");
    let engine = engine_for(&dir);

    let err = engine.render("broken", &Context::new()).unwrap_err();
    assert!(err.is_syntax_error());
}

#[test]
fn test_engine_from_config_file() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "sql/count.sql", "SELECT count(*) FROM t WHERE a = {{ a }}");
    write(
        dir.path(),
        "sqlstencil.yaml",
        "param_style: qmark\nsearch_paths:\n  - sql\n",
    );

    let config = EngineConfig::from_file(dir.path().join("sqlstencil.yaml")).unwrap();
    assert_eq!(config.search_paths, vec![dir.path().join("sql")]);

    let engine = QueryEngine::with_config(config).unwrap();
    let query = engine.render("count", &Context::new().with("a", 1)).unwrap();
    assert_eq!(query.query, "SELECT count(*) FROM t WHERE a = ?");
    assert_eq!(query.params, Params::Positional(vec![Value::from(1)]));
}

#[test]
fn test_config_with_missing_search_path_fails() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig::default().with_search_path(dir.path().join("absent"));
    assert!(matches!(
        QueryEngine::with_config(config),
        Err(QueryError::Load(LoadError::DirectoryNotFound { .. }))
    ));
}
