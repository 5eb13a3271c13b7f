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

use std::{
    borrow::Cow,
    pin::Pin,
    task::{Context, Poll},
};

use actix_multipart::{Field, Multipart, MultipartError};
use actix_web::{
    body::{BodySize, MessageBody},
    error::PayloadError,
    http::{
        header::{self, HeaderMap},
        Method,
    },
    HttpRequest, HttpResponse,
};
use bytes::{Bytes, BytesMut};
use encoding_rs::Encoding;
use futures::{
    stream::{self, MapErr},
    Stream, StreamExt, TryStreamExt,
};
use pin_project_lite::pin_project;

use crate::{
    cleanup::TempFiles,
    error::Error,
    types::{Event, FieldPart, FilePart, Options, Upload},
    upload::handle_upload,
};

/// The byte stream of a file part read from an actix `Multipart`
pub type FileStream = MapErr<Field, fn(MultipartError) -> Error>;

/// Whether the headers describe a `multipart/form-data` body
pub fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|ct| ct.to_str().ok())
        .and_then(|ct| ct.parse::<mime::Mime>().ok())
        .map(|ct| ct.type_() == mime::MULTIPART && ct.subtype() == mime::FORM_DATA)
        .unwrap_or(false)
}

/// Process a GraphQL multipart request.
///
/// Requests that aren't a `POST` with a `multipart/form-data` body are left alone, and resolve
/// to `None` without reading the body.
///
/// # Example
/// ```rust,no_run
/// # use actix_web::{web, HttpRequest, HttpResponse};
/// # use gql_multipart::{handle_request, Error, Options};
/// async fn graphql(
///     req: HttpRequest,
///     body: web::Payload,
///     options: web::Data<Options>,
/// ) -> Result<HttpResponse, Error> {
///     match handle_request(&req, body, &options).await? {
///         Some(upload) => {
///             let (payload, temp_files) = upload.into_parts();
///             // execute payload.query here
///             let res = HttpResponse::Ok().body(payload.query);
///             Ok(temp_files.attach(res).map_into_boxed_body())
///         }
///         None => Ok(HttpResponse::UnsupportedMediaType().finish()),
///     }
/// }
/// ```
pub async fn handle_request<S>(
    req: &HttpRequest,
    payload: S,
    options: &Options,
) -> Result<Option<Upload>, Error>
where
    S: Stream<Item = Result<Bytes, PayloadError>> + 'static,
{
    if *req.method() != Method::POST {
        trace!("Ignoring {} request", req.method());
        return Ok(None);
    }

    if !is_multipart(req.headers()) {
        trace!("Ignoring request without multipart/form-data body");
        return Ok(None);
    }

    let multipart = Multipart::new(req.headers(), payload);

    handle_upload(events(multipart, options.clone()), options)
        .await
        .map(Some)
}

/// Turn an actix `Multipart` into the event stream `handle_upload` consumes.
///
/// Field values are read into memory here, file parts are handed out unread. Limits on field
/// and file counts, header counts, and name and value sizes are applied while reading.
pub fn events(
    multipart: Multipart,
    options: Options,
) -> impl Stream<Item = Result<Event<FileStream>, Error>> {
    let tokenizer = Tokenizer {
        multipart,
        options,
        fields: 0,
        files: 0,
        state: TokenizerState::Reading,
    };

    stream::unfold(tokenizer, |mut tokenizer| async move {
        let event = tokenizer.next_event().await?;
        Some((event, tokenizer))
    })
}

#[derive(Debug, PartialEq)]
enum TokenizerState {
    Reading,
    Draining,
    Done,
}

struct Tokenizer {
    multipart: Multipart,
    options: Options,
    fields: usize,
    files: usize,
    state: TokenizerState,
}

impl Tokenizer {
    async fn next_event(&mut self) -> Option<Result<Event<FileStream>, Error>> {
        match self.state {
            TokenizerState::Done => return None,
            TokenizerState::Draining => {
                self.drain().await;
                self.state = TokenizerState::Done;
                return None;
            }
            TokenizerState::Reading => (),
        }

        let field = match self.multipart.next().await {
            Some(Ok(field)) => field,
            Some(Err(MultipartError::Incomplete)) if self.fields + self.files == 0 => {
                // a closing boundary with no parts before it
                trace!("Multipart body has no parts");
                self.state = TokenizerState::Done;
                return None;
            }
            Some(Err(e)) => {
                self.state = TokenizerState::Done;

                return Some(match Error::from(e) {
                    Error::ClientDisconnected => Ok(Event::Disconnected),
                    e => Err(e),
                });
            }
            None => {
                trace!("Multipart body finished");
                self.state = TokenizerState::Done;
                return None;
            }
        };

        let res = self.read_part(field).await;

        match res {
            Err(Error::Multipart { .. }) | Err(Error::ClientDisconnected) => {
                self.state = TokenizerState::Done
            }
            Ok(Event::FieldsLimit) | Ok(Event::FilesLimit) | Err(_) => {
                self.state = TokenizerState::Draining
            }
            Ok(_) => (),
        }

        Some(res)
    }

    async fn read_part(&mut self, mut field: Field) -> Result<Event<FileStream>, Error> {
        if field.headers().len() > self.options.max_header_pairs {
            warn!("Part has {} headers", field.headers().len());
            return Err(Error::HeaderPairs(self.options.max_header_pairs));
        }

        let (name, name_truncated) = match field.name() {
            Some(name) => truncate(name, self.options.max_field_name_size),
            None => return Err(Error::Field),
        };

        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(|filename| filename.to_owned());

        let encoding = field
            .headers()
            .get("content-transfer-encoding")
            .and_then(|encoding| encoding.to_str().ok())
            .map(|encoding| encoding.trim().to_lowercase())
            .unwrap_or_else(|| "7bit".to_owned());

        let mime_type = field.content_type().cloned().unwrap_or(mime::TEXT_PLAIN);

        if let Some(filename) = filename {
            if name_truncated {
                return Err(Error::FieldNameSize(self.options.max_field_name_size));
            }

            self.files += 1;
            if let Some(max) = self.options.max_files {
                if self.files > max {
                    warn!("More than {} files in request", max);
                    return Ok(Event::FilesLimit);
                }
            }

            info!("File: {:?}, filename: {:?}", name, filename);

            return Ok(Event::File(FilePart {
                name,
                stream: field.map_err(Error::from as fn(MultipartError) -> Error),
                filename,
                encoding,
                mime_type,
            }));
        }

        self.fields += 1;
        if let Some(max) = self.options.max_fields {
            if self.fields > max {
                warn!("More than {} fields in request", max);
                return Ok(Event::FieldsLimit);
            }
        }

        let (bytes, value_truncated) = read_field(&mut field, &self.options).await?;

        let charset = mime_type
            .get_param(mime::CHARSET)
            .map(|charset| charset.as_str().to_owned())
            .unwrap_or_else(|| self.options.def_charset.clone());
        let value = decode(&bytes, &charset, value_truncated)?;

        info!("Field: {:?}", name);

        Ok(Event::Field(FieldPart {
            name,
            value,
            name_truncated,
            value_truncated,
            encoding,
            mime_type,
        }))
    }

    async fn drain(&mut self) {
        debug!("Draining multipart body");

        while let Some(Ok(mut field)) = self.multipart.next().await {
            while let Some(Ok(_)) = field.next().await {}
        }
    }
}

fn truncate(name: &str, max: usize) -> (String, bool) {
    if name.len() <= max {
        return (name.to_owned(), false);
    }

    let mut end = max;
    while !name.is_char_boundary(end) {
        end -= 1;
    }

    (name[..end].to_owned(), true)
}

async fn read_field(field: &mut Field, options: &Options) -> Result<(BytesMut, bool), Error> {
    let mut buf = BytesMut::with_capacity(options.high_water_mark.min(options.max_field_size));
    let mut truncated = false;

    while let Some(chunk) = field.next().await {
        let chunk = chunk?;

        if truncated {
            continue;
        }

        let remaining = options.max_field_size - buf.len();
        if chunk.len() > remaining {
            buf.extend_from_slice(&chunk[..remaining]);
            truncated = true;
        } else {
            buf.extend_from_slice(&chunk);
        }
    }

    Ok((buf, truncated))
}

fn decode(bytes: &[u8], charset: &str, lossy: bool) -> Result<String, Error> {
    let encoding = match Encoding::for_label(charset.trim().as_bytes()) {
        Some(encoding) => encoding,
        None => return Err(Error::Charset(charset.to_owned())),
    };

    if lossy {
        let (value, _) = encoding.decode_without_bom_handling(bytes);
        return Ok(value.into_owned());
    }

    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(Cow::into_owned)
        .ok_or_else(|| Error::Charset(charset.to_owned()))
}

pin_project! {
    /// A response body that removes a request's temporary files once it has been sent
    pub struct CleanupBody<B> {
        #[pin]
        body: B,
        temp_files: Option<TempFiles>,
    }

    impl<B> PinnedDrop for CleanupBody<B> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();

            if let Some(temp_files) = this.temp_files.take() {
                temp_files.response_finished();
            }
        }
    }
}

impl<B: MessageBody> MessageBody for CleanupBody<B> {
    type Error = B::Error;

    #[inline]
    fn size(&self) -> BodySize {
        self.body.size()
    }

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Bytes, Self::Error>>> {
        self.project().body.poll_next(cx)
    }
}

impl TempFiles {
    /// Remove these files once `res` has been sent
    pub fn attach<B>(self, res: HttpResponse<B>) -> HttpResponse<CleanupBody<B>> {
        res.map_body(move |_, body| CleanupBody {
            body,
            temp_files: Some(self),
        })
    }
}
