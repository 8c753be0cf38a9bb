use std::fs;
use std::io::{Cursor, Read};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tessera::controller::{ActionContext, ActionTable, Args, Controller, Param, Reply};
use tessera::model::{self, PublicModel};
use tessera::template::{HandlebarsEngine, TemplateConfig};
use tessera::{
    App, AppContext, Cookie, Error, Request, Response, Result, StreamResponse, StreamSource, UploadedFile,
};

#[derive(Serialize)]
struct User {
    id: i64,
    name: String,
}

impl PublicModel for User {
    fn fields(&self) -> Result<Map<String, Value>> {
        model::fields_of(self)
    }

    fn template(&self) -> Option<String> {
        Some("user".into())
    }
}

struct Users;

impl Controller for Users {
    fn create(cx: &mut ActionContext) -> Result<Self> {
        cx.settings_mut().cookies.insert("seen".into(), Cookie::new("1"));
        Ok(Self)
    }

    fn actions(table: &mut ActionTable<Self>) {
        table
            .on("get", [Param::int("page").with_default(1)], |_, _, args: Args| {
                Ok(json!({"page": args.int("page"), "users": ["ann", "bob"]}))
            })
            .on("getShow", [Param::int("id")], |_, _, args: Args| {
                Ok(Reply::model(User { id: args.int("id"), name: "ann".into() }))
            })
            .on("post", [Param::string("name"), Param::bool("admin")], |_, _, args: Args| {
                if args.string("name").is_empty() {
                    return Err(Error::invalid_argument("name is required", "name"));
                }
                Ok(Response::data(json!({"name": args.string("name"), "admin": args.bool("admin")}))
                    .with_http_code(201))
            })
            .on("delete", [], |_, _, _| Ok(()))
            .on("getCount", [], |_, _, _| Ok(json!(3)));
    }
}

struct Files;

impl Controller for Files {
    fn create(cx: &mut ActionContext) -> Result<Self> {
        cx.settings_mut().present_format = "raw".into();
        Ok(Self)
    }

    fn actions(table: &mut ActionTable<Self>) {
        table
            .on("getHead", [Param::int("bytes")], |_, _, args: Args| {
                let size = u64::try_from(args.int("bytes")).unwrap_or(0);
                let reader = Cursor::new(b"0123456789abcdef".to_vec());
                Ok(Response::from(
                    StreamResponse::new(StreamSource::Reader(Box::new(reader)), "text/plain").with_size(size),
                ))
            })
            .on("getLines", [], |_, _, _| {
                let chunks = ["one\n", "two\n", "three\n"].map(|s| Ok::<_, std::io::Error>(Bytes::from_static(s.as_bytes())));
                Ok(Response::chunks(chunks, "text/plain"))
            });
    }
}

struct Uploads;

impl Controller for Uploads {
    fn create(_cx: &mut ActionContext) -> Result<Self> {
        Ok(Self)
    }

    fn actions(table: &mut ActionTable<Self>) {
        table.on("post", [Param::string("note")], |_, cx, args: Args| {
            let file = cx.request().file("doc").ok_or_else(|| Error::bad_request("doc is required"))?;
            let mut text = String::new();
            if let Some(mut stream) = cx.request().file_stream("doc")? {
                stream.read_to_string(&mut text)?;
            }
            Ok(json!({"note": args.string("note"), "name": file.original_name, "text": text}))
        });
    }
}

struct Pages;

impl Controller for Pages {
    fn create(_cx: &mut ActionContext) -> Result<Self> {
        Ok(Self)
    }

    fn actions(table: &mut ActionTable<Self>) {
        table
            .on("get", [Param::string("title")], |_, _, args: Args| {
                Ok(Response::data(json!({"title": args.string("title")})).with_template("page"))
            })
            .on("getDone", [], |_, _, _| Ok(Response::complete("<p>done</p>")))
            .on("postSave", [], |_, _, _| {
                Ok(Response::redirect_or_data("/pages", json!({"saved": true})))
            })
            .on("getFail", [], |_, _, _| Err::<Reply, _>(Error::conflict("already saved")));
    }

    fn before_action(&mut self, cx: &mut ActionContext) -> Result<()> {
        if cx.request().header("X-Guarded").is_some() {
            cx.settings_mut().redirect_on_error = Some("/oops".into());
        }
        Ok(())
    }
}

fn app() -> App {
    App::new(AppContext::default().with_default_format("json"))
        .register_endpoint::<Users>("/users", "")
        .register_endpoint::<Users>("/users/*", "show")
        .register_endpoint::<Users>("/users-count", "count")
        .register_endpoint::<Files>(["/head", "/lines"], "")
}

fn get(endpoint: &str) -> Request {
    Request::new().with_endpoint(endpoint)
}

#[test]
fn json_data_with_defaults_and_cookies() {
    let mut out = app().handle(get("/users"));
    assert_eq!(out.status(), 200);
    assert_eq!(out.format(), "json");
    assert_eq!(out.header("Content-Type"), Some("application/json"));
    assert_eq!(out.materialize().unwrap(), r#"{"page":1,"users":["ann","bob"]}"#);
    assert!(out.cookies().contains_key("seen"));
}

#[test]
fn query_values_are_coerced() {
    let mut request = get("/users");
    request.set("page", "7");
    let mut out = app().handle(request);
    assert_eq!(out.materialize().unwrap(), r#"{"page":7,"users":["ann","bob"]}"#);
}

#[test]
fn prefix_route_hands_over_the_hint() {
    let mut request = get("/users/42");
    request.set("id", 42);
    let mut out = app().handle(request.with_present_format("raw"));
    assert_eq!(out.materialize().unwrap(), "id = 42\nname = ann\nData template: user");
}

#[test]
fn json_body_is_parsed_once() {
    let request = get("/users")
        .with_method("POST")
        .with_header("Content-Type", "application/json; charset=utf-8")
        .with_body(r#"{"name":"cy","admin":"yes"}"#);
    let mut out = app().handle(request);
    assert_eq!(out.status(), 201);
    assert_eq!(out.materialize().unwrap(), r#"{"name":"cy","admin":true}"#);
}

#[test]
fn raw_form_bodies_are_rejected() {
    let request = get("/users")
        .with_method("POST")
        .with_header("Content-Type", "application/x-www-form-urlencoded")
        .with_body("name=cy");
    let out = app().handle(request);
    assert_eq!(out.status(), 501);
}

#[test]
fn uploaded_files_reach_the_action() {
    let dir = tempfile::tempdir().unwrap();
    let local_path = dir.path().join("spooled");
    fs::write(&local_path, "draft").unwrap();

    let app = App::new(AppContext::default().with_default_format("json"))
        .register_endpoint::<Uploads>("/docs", "");
    let mut request = get("/docs").with_method("POST").with_file("doc", UploadedFile {
        local_path,
        original_name: "notes.txt".into(),
        mime_type: "text/plain".into(),
        size: 5,
    });
    request.set("note", "v1");

    let mut out = app.handle(request);
    assert_eq!(out.status(), 200);
    assert_eq!(out.materialize().unwrap(), r#"{"note":"v1","name":"notes.txt","text":"draft"}"#);

    let out = app.handle(get("/docs").with_method("POST"));
    assert_eq!(out.status(), 400);
}

#[test]
fn validation_errors_keep_their_status() {
    let mut out = app().handle(get("/users").with_method("POST").with_present_format("xml"));
    assert_eq!(out.status(), 422);
    assert_eq!(out.header("Content-Type"), Some("application/xml"));
    assert_eq!(
        out.materialize().unwrap(),
        r#"<?xml version="1.0" encoding="UTF-8"?><response><error>name is required</error></response>"#
    );
}

#[test]
fn unit_reply_is_no_content() {
    let mut out = app().handle(get("/users").with_method("DELETE"));
    assert_eq!(out.status(), 204);
    assert_eq!(out.materialize().unwrap(), "");
}

#[test]
fn scalar_reply_is_an_error() {
    let out = app().handle(get("/users-count"));
    assert_eq!(out.status(), 500);
}

#[test]
fn unknown_action_is_404() {
    let mut out = app().handle(get("/users").with_method("PATCH"));
    assert_eq!(out.status(), 404);
    assert_eq!(out.materialize().unwrap(), r#"{"error":"Method not found for the endpoint"}"#);
}

#[test]
fn stream_stops_at_the_declared_size() {
    let mut request = get("/head");
    request.set("bytes", 10);
    let mut out = app().handle(request);
    assert_eq!(out.header("Content-Length"), Some("10"));
    assert_eq!(out.header("Content-Type"), Some("text/plain"));
    assert_eq!(out.materialize().unwrap(), "0123456789");
}

#[test]
fn chunks_arrive_in_order() {
    let mut out = app().handle(get("/lines"));
    let mut sink = Vec::new();
    assert_eq!(out.write_to(&mut sink).unwrap(), 14);
    assert_eq!(sink, b"one\ntwo\nthree\n");
}

#[test]
fn command_line_requests() {
    let args = ["--endpoint=/users", "--method=POST", "--format=raw", "--name=dee"];
    let mut out = app().handle(Request::from_args(args));
    assert_eq!(out.status(), 201);
    assert_eq!(out.materialize().unwrap(), "name = dee\nadmin = false\n");
}

fn html_app(dir: &std::path::Path) -> App {
    fs::write(dir.join("page.htm"), "<h1>{{title}}</h1>").unwrap();
    fs::write(dir.join("layout.htm"), "<body>{{{content}}}</body>").unwrap();
    let engine = HandlebarsEngine::new(TemplateConfig::new(dir)).unwrap();
    let cx = AppContext::default()
        .with_templates(Arc::new(engine))
        .with_base_template_var("content");
    App::new(cx).register_endpoint::<Pages>("/pages/*", "")
}

#[test]
fn html_pages_and_redirects() {
    let dir = tempfile::tempdir().unwrap();
    let app = html_app(dir.path());

    let mut request = get("/pages");
    request.set("title", "Hello & bye");
    let mut out = app.handle(request);
    assert_eq!(out.header("Content-Type"), Some("text/html"));
    assert_eq!(out.materialize().unwrap(), "<h1>Hello &amp; bye</h1>");

    let mut out = app.handle(get("/pages/"));
    assert_eq!(out.materialize().unwrap(), "<h1></h1>");

    let out = app.handle(get("/pages").with_method("POST").with_endpoint("/pages"));
    assert_eq!(out.status(), 404);
}

#[test]
fn html_errors_can_redirect() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::new(
        AppContext::default().with_templates(Arc::new(
            HandlebarsEngine::new(TemplateConfig::new(dir.path())).unwrap(),
        )),
    )
    .register_endpoint::<Pages>("/fail", "fail")
    .register_endpoint::<Pages>("/done", "done")
    .register_endpoint::<Pages>("/save", "save");

    let mut out = app.handle(get("/fail"));
    assert_eq!(out.status(), 409);
    assert_eq!(out.materialize().unwrap(), "<html>Error: already saved\n</html>");

    let out = app.handle(get("/fail").with_header("X-Guarded", "1"));
    assert_eq!(out.status(), 302);
    assert_eq!(out.header("Location"), Some("/oops"));

    // the same failure as JSON is not redirected
    let out = app.handle(get("/fail").with_header("X-Guarded", "1").with_present_format("json"));
    assert_eq!(out.status(), 409);

    let mut out = app.handle(get("/done"));
    assert_eq!(out.materialize().unwrap(), "<p>done</p>");

    let out = app.handle(get("/save").with_method("POST"));
    assert_eq!(out.status(), 302);
    assert_eq!(out.header("Location"), Some("/pages"));

    let mut out = app.handle(get("/save").with_method("POST").with_present_format("json"));
    assert_eq!(out.status(), 200);
    assert_eq!(out.materialize().unwrap(), r#"{"saved":true}"#);
}
