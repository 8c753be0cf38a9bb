//! # tessera
//!
//! A small MVC web framework: route an endpoint to a controller action,
//! turn whatever the action returns into a typed response, render that
//! response in the format the client wants.
//!
//! ## The pipeline
//!
//! ```text
//! Request ──► App (route index) ──► Controller action ──► Response ──► Presenter ──► Output
//!              exact / prefix          typed Args            Data          html
//!              default controller      Reply → Response      Error         json
//!              404                     errors → ErrorResponse Redirect     xml
//!                                                            NoContent     raw
//!                                                            Stream
//! ```
//!
//! - [`Request`] is transport-agnostic: the HTTP adapter and
//!   [`Request::from_args`] both produce one.
//! - [`Response`] is a closed set of variants sharing status, headers and
//!   cookies.
//! - A [`Presenter`] per output format renders responses into an
//!   [`Output`]; the [`Builder`] picks one by format key.
//! - [`App::handle`] never fails: every error ends up rendered somehow.
//!
//! The pipeline is synchronous. [`Server`] runs it on tokio's blocking pool
//! behind hyper, with graceful shutdown.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use serde_json::json;
//! use tessera::controller::{ActionContext, ActionTable, Args, Controller, Param};
//! use tessera::{App, AppContext, Response, Result, Server};
//!
//! struct Users;
//!
//! impl Users {
//!     fn show(&mut self, cx: &mut ActionContext, args: Args) -> Result<Response> {
//!         Ok(Response::data(json!({ "id": args.int("id"), "rest": cx.endpoint() })))
//!     }
//! }
//!
//! impl Controller for Users {
//!     fn create(_cx: &mut ActionContext) -> Result<Self> {
//!         Ok(Self)
//!     }
//!
//!     fn actions(table: &mut ActionTable<Self>) {
//!         table.on("getShow", [Param::int("id")], Self::show);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     tessera::logging::init(None);
//!
//!     let app = App::new(AppContext::default().with_default_format("json"))
//!         .register_endpoint::<Users>("/users/*", "show");
//!
//!     Server::bind("0.0.0.0:3000")?.serve(app).await
//! }
//! ```

mod app;
mod config;
mod context;
mod error;
mod handler;
mod links;
mod method;
mod multipart;
mod request;
mod response;
mod router;
mod server;
mod value;

pub mod controller;
pub mod i18n;
pub mod logging;
pub mod model;
pub mod present;
pub mod session;
pub mod template;

pub use app::{App, RouteTarget};
pub use config::{Config, ConfigSources};
pub use context::{AppContext, SessionFactory};
pub use controller::{ActionContext, Controller};
pub use error::{Error, ErrorKind, Result};
pub use handler::ControllerRef;
pub use links::LinksManager;
pub use method::RequestMethod;
pub use present::{Body, Builder, Output, Presenter};
pub use request::{Request, UploadedFile};
pub use response::{
    ChunkIter, Cookie, DataResponse, ErrorResponse, RedirectResponse, Response, ResponseKind,
    StreamResponse, StreamSource,
};
pub use router::IntoEndpoints;
pub use server::{HttpBody, Server};
pub use value::{Converter, ValueType, ValueTypes};
