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

use std::{collections::HashMap, mem, pin::Pin};

use bytes::Bytes;
use futures::{pin_mut, Stream, StreamExt};
use serde_derive::Deserialize;
use serde_json::{Map, Value as JsonValue};

use crate::{
    barrier::CompletionBarrier,
    cleanup::TempFiles,
    error::Error,
    file::{materialize, PendingFile},
    types::{Event, FieldPart, FilePart, Options, Payload, Upload, Value, Variables},
};

#[derive(Debug, Deserialize)]
struct RawPayload {
    query: Option<String>,
    variables: Option<Map<String, JsonValue>>,
}

#[derive(Debug)]
struct Assembled {
    query: Option<String>,
    variables: Option<Variables>,
}

#[derive(Debug)]
enum State {
    Empty,
    Open(Assembled),
}

/// Per-request state: the payload being built, and every file written for it
struct Assembler<'a> {
    options: &'a Options,
    state: State,
    pending: Vec<PendingFile>,
    temp_files: TempFiles,
    barrier: CompletionBarrier,
}

fn into_variables(map: Map<String, JsonValue>) -> Variables {
    map.into_iter()
        .map(|(key, value)| (key, Value::Json(value)))
        .collect()
}

impl<'a> Assembler<'a> {
    fn new(options: &'a Options) -> Self {
        Assembler {
            options,
            state: State::Empty,
            pending: Vec::new(),
            temp_files: TempFiles::new(),
            barrier: CompletionBarrier::new(),
        }
    }

    async fn handle_event<S>(&mut self, event: Event<S>) -> Result<(), Error>
    where
        S: Stream<Item = Result<Bytes, Error>>,
    {
        match event {
            Event::Field(field) => self.handle_field(field),
            Event::File(file) => self.handle_file(file).await,
            Event::FieldsLimit => Err(Error::FieldCount(self.options.max_fields.unwrap_or(0))),
            Event::FilesLimit => Err(Error::FileCount(self.options.max_files.unwrap_or(0))),
            Event::Disconnected => Err(Error::ClientDisconnected),
        }
    }

    fn handle_field(&mut self, field: FieldPart) -> Result<(), Error> {
        trace!("Field: {:?}", field.name);

        if field.name_truncated {
            return Err(Error::FieldNameSize(self.options.max_field_name_size));
        }

        if field.value_truncated {
            return Err(Error::FieldSize(self.options.max_field_size));
        }

        if field.name == "payload" {
            let raw: RawPayload =
                serde_json::from_str(&field.value).map_err(Error::InvalidPayloadJson)?;

            self.pending.clear();
            self.state = State::Open(Assembled {
                query: raw.query,
                variables: raw.variables.map(into_variables),
            });

            return Ok(());
        }

        let assembled = match self.state {
            State::Empty if field.name == "query" => {
                self.state = State::Open(Assembled {
                    query: Some(field.value),
                    variables: None,
                });

                return Ok(());
            }
            State::Empty => return Err(Error::MissingLeadingPayload),
            State::Open(ref mut assembled) => assembled,
        };

        if field.name == "variables" {
            let variables: Option<Map<String, JsonValue>> =
                serde_json::from_str(&field.value).map_err(Error::InvalidVariablesJson)?;

            for (name, value) in variables.into_iter().flatten() {
                self.pending.retain(|pending| pending.variable != name);
                assembled
                    .variables
                    .get_or_insert_with(HashMap::new)
                    .insert(name, Value::Json(value));
            }

            return Ok(());
        }

        let name = match field.name.strip_prefix('$') {
            Some(name) => name.to_owned(),
            None => return Err(Error::VariableName),
        };

        let value = if field.mime_type.essence_str() == mime::APPLICATION_JSON.essence_str() {
            serde_json::from_str(&field.value).map_err(|cause| Error::InvalidFieldJson {
                name: field.name.clone(),
                cause,
            })?
        } else {
            JsonValue::String(field.value)
        };

        // a later field replaces files sent earlier under the same name
        self.pending.retain(|pending| pending.variable != name);
        assembled
            .variables
            .get_or_insert_with(HashMap::new)
            .insert(name, Value::Json(value));

        Ok(())
    }

    async fn handle_file<S>(&mut self, file: FilePart<S>) -> Result<(), Error>
    where
        S: Stream<Item = Result<Bytes, Error>>,
    {
        trace!("File: {:?}, filename: {:?}", file.name, file.filename);

        if let State::Empty = self.state {
            return Err(Error::MissingLeadingPayload);
        }

        // tokenizers shouldn't produce this, but nothing stops a custom one from doing so
        let variable = match file.name.strip_prefix('$') {
            Some(variable) => variable.to_owned(),
            None => return Err(Error::VariableName),
        };

        let pending = materialize(
            variable,
            file,
            self.options,
            &mut self.temp_files,
            &self.barrier,
        )
        .await?;
        self.pending.push(pending);

        Ok(())
    }

    /// Build the payload once the body is finished and every file has been flushed
    fn finish(&mut self) -> Result<Payload, Error> {
        let assembled = match mem::replace(&mut self.state, State::Empty) {
            State::Empty => return Err(Error::MissingPayload),
            State::Open(assembled) => assembled,
        };

        let query = assembled.query.ok_or(Error::MissingQuery)?;
        let mut variables = assembled.variables;

        for pending in self.pending.drain(..) {
            let variable = pending.variable.clone();
            let handle = pending.into_handle()?;

            let variables = variables.get_or_insert_with(HashMap::new);
            let existing = variables.remove(&variable);
            variables.insert(variable, Value::push_file(existing, handle));
        }

        Ok(Payload { query, variables })
    }
}

async fn drain<E, S>(mut events: Pin<Box<E>>)
where
    E: Stream<Item = Result<Event<S>, Error>>,
    S: Stream<Item = Result<Bytes, Error>>,
{
    trace!("Draining unread parts");

    while let Some(event) = events.next().await {
        if let Ok(Event::File(file)) = event {
            let stream = file.stream;
            pin_mut!(stream);

            while let Some(Ok(_)) = stream.next().await {}
        }
    }

    trace!("Finished draining");
}

/// Assemble a `Payload` from a stream of multipart events.
///
/// Events are handled in order. The first failure stops processing, but the result is only
/// returned once every file write that already finished reading has been flushed. On failure
/// every temporary file is removed before the error is returned. On success the files are
/// handed back in `Upload::temp_files`, and should be removed once the response is sent.
///
/// When a failure stops processing early, the unread parts are drained on a local task after
/// the error has been returned, so this must be called from within an actix or tokio
/// `LocalSet` runtime.
pub async fn handle_upload<E, S>(events: E, options: &Options) -> Result<Upload, Error>
where
    E: Stream<Item = Result<Event<S>, Error>> + 'static,
    S: Stream<Item = Result<Bytes, Error>> + 'static,
{
    let mut events = Box::pin(events);

    let mut assembler = Assembler::new(options);
    let mut finished = false;

    let outcome = loop {
        let event = match events.next().await {
            Some(Ok(event)) => event,
            Some(Err(e)) => break Err(e),
            None => {
                finished = true;
                break Ok(());
            }
        };

        if let Err(e) = assembler.handle_event(event).await {
            break Err(e);
        }
    };

    let pending = assembler.barrier.pending();
    if pending > 0 {
        debug!("Waiting for {} file writes to flush", pending);
    }
    assembler.barrier.wait().await;

    let res = outcome.and_then(|()| assembler.finish());
    let Assembler { temp_files, .. } = assembler;

    let res = match res {
        Ok(payload) => {
            info!("Assembled payload with {} temp files", temp_files.len());
            Ok(Upload {
                payload,
                temp_files,
            })
        }
        Err(e) => {
            info!("Multipart request failed, {}", e);
            temp_files.cleanup();
            Err(e)
        }
    };

    if !finished {
        actix_web::rt::spawn(drain(events));
    }

    res
}
