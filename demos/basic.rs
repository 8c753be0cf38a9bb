//! Minimal tessera example: a JSON users controller, a streaming download
//! and a command-line mode sharing the same app.
//!
//! Run the server with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl 'http://localhost:3000/users?page=2'
//!   curl -X POST http://localhost:3000/users \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl http://localhost:3000/countdown
//!   curl http://localhost:3000/nowhere
//!
//! Or skip HTTP entirely:
//!   cargo run --example basic -- --endpoint=/users/7 --format=raw

use std::io;

use bytes::Bytes;
use serde_json::json;
use tessera::controller::{ActionContext, ActionTable, Args, Controller, Param};
use tessera::{App, AppContext, Config, ConfigSources, Error, Request, Response, Result, Server};

struct Users;

impl Users {
    // GET /users?page=N
    fn list(&mut self, _cx: &mut ActionContext, args: Args) -> Result<Response> {
        let page = args.int("page");
        Ok(Response::data(json!({
            "page": page,
            "users": [{"id": "1", "name": "alice"}, {"id": "2", "name": "bob"}],
        })))
    }

    // GET /users/:id
    fn show(&mut self, cx: &mut ActionContext, _args: Args) -> Result<Response> {
        let id = cx.endpoint();
        if id.is_empty() {
            return Err(Error::invalid_argument("missing user id", "id"));
        }
        Ok(Response::data(json!({"id": id, "name": "alice"})))
    }

    // POST /users → 201
    fn create_user(&mut self, _cx: &mut ActionContext, args: Args) -> Result<Response> {
        let name = args.string("name");
        if name.is_empty() {
            return Err(Error::bad_request("name is required"));
        }
        Ok(Response::data(json!({"id": "99", "name": name}))
            .with_http_code(201)
            .with_header("Location", "/users/99"))
    }
}

impl Controller for Users {
    fn create(_cx: &mut ActionContext) -> Result<Self> {
        Ok(Self)
    }

    fn actions(table: &mut ActionTable<Self>) {
        table
            .on("get", [Param::int("page").with_default(1)], Self::list)
            .on("getShow", [], Self::show)
            .on("post", [Param::string("name")], Self::create_user);
    }
}

struct Countdown;

impl Controller for Countdown {
    fn create(_cx: &mut ActionContext) -> Result<Self> {
        Ok(Self)
    }

    fn actions(table: &mut ActionTable<Self>) {
        table.on("get", [Param::int("from").with_default(5)], |_, _, args| {
            let from = args.int("from").clamp(0, 100);
            let lines = (0..=from).rev().map(|n| Ok::<_, io::Error>(Bytes::from(format!("{n}\n"))));
            Ok(Response::chunks(lines.collect::<Vec<_>>(), "text/plain"))
        });
    }
}

fn app() -> Result<App> {
    let config = Config::load(&ConfigSources {
        json_file: Some("config.json".into()),
        env_file: Some(".env".into()),
        read_env: true,
    })?;

    Ok(App::new(AppContext::new(config).with_default_format("json"))
        .register_endpoint::<Users>("/users", "")
        .register_endpoint::<Users>("/users/*", "show")
        .register_endpoint::<Countdown>("/countdown", ""))
}

#[tokio::main]
async fn main() -> Result<()> {
    tessera::logging::init(Some("info"));

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a.starts_with("--endpoint=")) {
        let mut output = app()?.handle(Request::from_args(&args));
        eprintln!("{}", output.status_line());
        output.write_to(&mut io::stdout().lock())?;
        return Ok(());
    }

    Server::bind("0.0.0.0:3000")?.serve(app()?).await
}
