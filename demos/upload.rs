use std::env;

use actix_web::{middleware::Logger, web, App, HttpRequest, HttpResponse, HttpServer};
use gql_multipart::{handle_request, Error, Options, Value};
use log::info;

async fn graphql(
    req: HttpRequest,
    body: web::Payload,
    options: web::Data<Options>,
) -> Result<HttpResponse, Error> {
    let upload = match handle_request(&req, body, &options).await? {
        Some(upload) => upload,
        None => return Ok(HttpResponse::UnsupportedMediaType().finish()),
    };

    let (payload, temp_files) = upload.into_parts();
    info!("Query: {}", payload.query);

    if let Some(ref variables) = payload.variables {
        for (name, value) in variables {
            match value {
                Value::File(file) => info!("${}: {} at {:?}", name, file.name, file.path),
                Value::List(values) => info!("${}: list of {}", name, values.len()),
                Value::Json(json) => info!("${}: {}", name, json),
            }
        }
    }

    let res = HttpResponse::Ok().json(&payload);

    Ok(temp_files.attach(res).map_into_boxed_body())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "upload=info,gql_multipart=debug,actix_web=info");
    }
    env_logger::init();

    let options = web::Data::new(
        Options::new()
            .temp_dir(env::temp_dir())
            .max_files(10)
            .max_file_size(10_000_000),
    );

    HttpServer::new(move || {
        App::new()
            .app_data(options.clone())
            .wrap(Logger::default())
            .route("/graphql", web::post().to(graphql))
    })
    .bind("127.0.0.1:8080")?
    .run()
    .await
}
