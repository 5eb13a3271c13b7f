/*
 * This file is part of Actix GQL Multipart.
 *
 * Copyright © 2018 Riley Trautman
 *
 * Actix GQL Multipart is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Actix GQL Multipart is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Actix GQL Multipart.  If not, see <http://www.gnu.org/licenses/>.
 */

//! # Actix GQL Multipart
//! Turn `multipart/form-data` GraphQL requests into a query and its variables.
//!
//! The first part of the body must be either a `payload` field holding the JSON
//! `{"query": ..., "variables": ...}` object, or a bare `query` field optionally followed by a
//! `variables` field. Every later part names a variable with a leading `$`. Files are streamed
//! to temporary files on disk and show up in the variables as [`FileHandle`]s, which stay
//! readable until the response has been sent.
//!
//! # Example
//! ```rust,no_run
//! use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
//! use gql_multipart::{handle_request, Error, Options};
//!
//! async fn graphql(
//!     req: HttpRequest,
//!     body: web::Payload,
//!     options: web::Data<Options>,
//! ) -> Result<HttpResponse, Error> {
//!     let upload = match handle_request(&req, body, &options).await? {
//!         Some(upload) => upload,
//!         None => return Ok(HttpResponse::UnsupportedMediaType().finish()),
//!     };
//!
//!     let (payload, temp_files) = upload.into_parts();
//!     let res = HttpResponse::Ok().body(payload.query);
//!
//!     Ok(temp_files.attach(res).map_into_boxed_body())
//! }
//!
//! #[actix_web::main]
//! async fn main() -> std::io::Result<()> {
//!     let options = web::Data::new(Options::new().max_files(10));
//!
//!     HttpServer::new(move || {
//!         App::new()
//!             .app_data(options.clone())
//!             .route("/graphql", web::post().to(graphql))
//!     })
//!     .bind("127.0.0.1:8080")?
//!     .run()
//!     .await
//! }
//! ```

#[macro_use]
extern crate log;

mod actix;
mod barrier;
mod cleanup;
mod error;
mod file;
mod types;
mod upload;

pub use self::actix::{events, handle_request, is_multipart, CleanupBody, FileStream};
pub use self::cleanup::TempFiles;
pub use self::error::Error;
pub use self::types::*;
pub use self::upload::handle_upload;
