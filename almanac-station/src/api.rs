//! HTTP API serving channel history from the running station.
//!
//! Uses `std::net::TcpListener`; one request per connection.
//! Endpoints:
//!
//! - `GET /health`: liveness check
//! - `GET /info`: channel metadata and publish counters (JSON)
//! - `GET /<channel>`: latest reading
//! - `GET /<channel>?count=<n>`: the last `n` readings
//! - `GET /<channel>?startDate=<date>&endDate=<date>`: readings in a window

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use almanac::error::AlmanacError;
use almanac::{QueryOutcome, QueryParams, Reading, Station};
use serde::Serialize;

/// Status line and JSON body of one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Serialized JSON body.
    pub body: String,
}

impl Response {
    fn json<T: Serialize>(status: u16, body: &T) -> Self {
        match serde_json::to_string(body) {
            Ok(body) => Self { status, body },
            Err(e) => {
                tracing::warn!("failed to encode response: {e}");
                Self::error(500, "failed to encode response")
            }
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self::json(status, &serde_json::json!({ "error": message }))
    }
}

/// Body of a count or range answer.
#[derive(Serialize)]
struct ListBody<'a> {
    readings: Vec<&'a Reading>,
    partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<&'a str>,
}

/// Binds `0.0.0.0:<port>` and serves requests until the listener fails.
///
/// Blocks the calling thread.
///
/// # Errors
///
/// Returns the bind error.
pub fn run_api_server(station: Arc<Station>, port: u16) -> std::io::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)?;
    tracing::info!("API listening on {addr}");
    serve(&listener, &station);
    Ok(())
}

/// Accepts connections on `listener` and answers them one at a time.
pub fn serve(listener: &TcpListener, station: &Station) {
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("accept error: {e}");
                continue;
            }
        };

        // Short read timeout so a slow client cannot stall the loop.
        let _ = stream.set_read_timeout(Some(std::time::Duration::from_secs(5)));

        if let Err(e) = handle_request(&stream, station) {
            tracing::debug!("request error: {e}");
        }
    }
}

/// Reads one request from `stream` and writes the routed response.
fn handle_request(stream: &TcpStream, station: &Station) -> Result<(), Box<dyn std::error::Error>> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;

    // "GET /path?query HTTP/1.x"
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return send_response(stream, &Response::error(400, "bad request"));
    }

    // Headers are not used.
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 || line.trim().is_empty() {
            break;
        }
    }

    if parts[0] != "GET" {
        return send_response(stream, &Response::error(405, "method not allowed"));
    }

    let (path, query) = parts[1].split_once('?').unwrap_or((parts[1], ""));
    let response = route(station, path, query);
    tracing::debug!(path, query, status = response.status, "request served");
    send_response(stream, &response)
}

/// Maps a request path and raw query string to a response.
pub fn route(station: &Station, path: &str, query: &str) -> Response {
    match path {
        "/health" => Response::json(200, &serde_json::json!({ "status": "ok" })),
        "/info" => Response::json(200, &serde_json::json!({ "channels": station.info() })),
        _ => {
            let Some(channel) = path
                .strip_prefix('/')
                .filter(|name| !name.is_empty() && !name.contains('/'))
            else {
                return Response::error(404, "not found");
            };
            query_channel(station, channel, &parse_query(query))
        }
    }
}

fn query_channel(station: &Station, channel: &str, params: &QueryParams) -> Response {
    match station.query(channel, params) {
        Ok(outcome) => outcome_response(&outcome),
        Err(AlmanacError::Query(e)) => Response::error(400, &e.to_string()),
        Err(AlmanacError::Station(_)) => Response::error(404, "not found"),
        Err(e) => {
            tracing::warn!(channel, "query failed: {e}");
            Response::error(500, "internal error")
        }
    }
}

/// Response for a successful query.
pub fn outcome_response(outcome: &QueryOutcome) -> Response {
    match outcome {
        QueryOutcome::Latest(reading) => Response::json(200, reading.as_ref()),
        QueryOutcome::List {
            readings,
            partial,
            note,
        } => Response::json(
            200,
            &ListBody {
                readings: readings.iter().map(|r| &**r).collect(),
                partial: *partial,
                note: note.as_deref(),
            },
        ),
        QueryOutcome::Empty => Response::json(200, &serde_json::json!({ "message": "no data yet" })),
    }
}

fn send_response(mut stream: &TcpStream, response: &Response) -> Result<(), Box<dyn std::error::Error>> {
    let status_text = match response.status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => "Unknown",
    };

    write!(
        stream,
        "HTTP/1.1 {} {status_text}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        response.status,
        response.body.len(),
        response.body,
    )?;

    Ok(())
}

/// Parses a query string into parameters, percent-decoding names and values.
///
/// A name without `=` gets an empty value. A repeated name keeps its last
/// value.
pub fn parse_query(query: &str) -> QueryParams {
    query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (percent_decode(k), percent_decode(v))
        })
        .collect()
}

/// Decodes `%XX` escapes and `+` as space. Malformed escapes pass through.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                match (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi << 4) | lo);
                        i += 2;
                    }
                    _ => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
