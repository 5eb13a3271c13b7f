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

use std::io;

use actix_multipart::MultipartError;
use actix_web::{error::PayloadError, ResponseError};
use failure::Fail;
use http::StatusCode;

#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "Error saving file, {}", _0)]
    Io(#[cause] io::Error),
    #[fail(display = "{}", message)]
    Multipart { status: StatusCode, message: String },
    #[fail(display = "Invalid JSON in the \"payload\" multipart field")]
    InvalidPayloadJson(#[cause] serde_json::Error),
    #[fail(display = "Invalid JSON in the \"variables\" multipart field")]
    InvalidVariablesJson(#[cause] serde_json::Error),
    #[fail(display = "Invalid JSON data in the \"{}\" multipart field", name)]
    InvalidFieldJson {
        name: String,
        #[cause]
        cause: serde_json::Error,
    },
    #[fail(display = "First multipart field must be \"payload\" or \"query\"")]
    MissingLeadingPayload,
    #[fail(display = "Variable fields must start with \"$\" character")]
    VariableName,
    #[fail(display = "Missing \"payload\" multipart field")]
    MissingPayload,
    #[fail(display = "Missing \"query\" in multipart payload")]
    MissingQuery,
    #[fail(display = "Failed to parse field name")]
    Field,
    #[fail(display = "Failed to decode field with charset {}", _0)]
    Charset(String),
    #[fail(display = "Field name exceeds the maximum length. {}", _0)]
    FieldNameSize(usize),
    #[fail(display = "Field exceeds the maximum field size limit. {}", _0)]
    FieldSize(usize),
    #[fail(display = "{} max fields exceeded.", _0)]
    FieldCount(usize),
    #[fail(display = "File exceeds the maximum file size limit. {}", _0)]
    FileSize(usize),
    #[fail(display = "{} max file uploads exceeded.", _0)]
    FileCount(usize),
    #[fail(display = "{} max header pairs exceeded.", _0)]
    HeaderPairs(usize),
    #[fail(display = "Client disconnected")]
    ClientDisconnected,
}

impl Error {
    /// The HTTP status class this error should be reported with
    pub fn status(&self) -> StatusCode {
        match *self {
            Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Multipart { status, .. } => status,
            Error::FieldNameSize(_)
            | Error::FieldSize(_)
            | Error::FieldCount(_)
            | Error::FileSize(_)
            | Error::FileCount(_)
            | Error::HeaderPairs(_) => StatusCode::PAYLOAD_TOO_LARGE,
            // nginx's "client closed request"
            Error::ClientDisconnected => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Whether the client caused this error and can fix it by changing the request
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        self.status()
    }
}

impl From<MultipartError> for Error {
    fn from(e: MultipartError) -> Self {
        match e {
            // a body that simply ends early is malformed, not a disconnect
            MultipartError::Payload(PayloadError::Incomplete(_)) => Error::ClientDisconnected,
            e => Error::Multipart {
                status: e.status_code(),
                message: e.to_string(),
            },
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
