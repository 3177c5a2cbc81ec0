//! HTTP surface shared by the device server and the host simulation.
//!
//! Both servers register [`ROUTES`] and hand each request to [`dispatch`];
//! only transport glue lives in the binaries.

use std::borrow::Cow;

use log::{debug, info};

use crate::{
    page::INDEX_HTML,
    state::SharedState,
    types::{MotorCommand, TemperatureUnit},
};

/// Bodies longer than this are never a valid motor command.
pub const MAX_COMMAND_BODY: usize = 512;

pub const CONTENT_TYPE_HTML: &str = "text/html; charset=utf-8";
pub const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";

/// Form fields that carry a motor command, in lookup order.
const COMMAND_FIELDS: [&str; 2] = ["state", "OnOff"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Index,
    MotorCommand,
    TemperatureC,
    TemperatureF,
}

#[derive(Debug, Clone, Copy)]
pub struct RouteSpec {
    pub path: &'static str,
    pub method: HttpMethod,
    pub route: Route,
}

pub const ROUTES: &[RouteSpec] = &[
    RouteSpec {
        path: "/",
        method: HttpMethod::Get,
        route: Route::Index,
    },
    RouteSpec {
        path: "/",
        method: HttpMethod::Post,
        route: Route::MotorCommand,
    },
    RouteSpec {
        path: "/motor",
        method: HttpMethod::Post,
        route: Route::MotorCommand,
    },
    RouteSpec {
        path: "/tempC",
        method: HttpMethod::Get,
        route: Route::TemperatureC,
    },
    RouteSpec {
        path: "/tempF",
        method: HttpMethod::Get,
        route: Route::TemperatureF,
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Cow<'static, str>,
}

impl Reply {
    fn ok(content_type: &'static str, body: impl Into<Cow<'static, str>>) -> Self {
        Self {
            status: 200,
            content_type,
            body: body.into(),
        }
    }
}

/// Answers one request against the shared state. Reads have no side effects;
/// a motor write always answers `200 OK`, recognized or not.
pub fn dispatch(route: Route, body: &[u8], state: &mut SharedState) -> Reply {
    match route {
        Route::Index => Reply::ok(CONTENT_TYPE_HTML, INDEX_HTML),
        Route::TemperatureC => Reply::ok(
            CONTENT_TYPE_TEXT,
            state.temperature_text(TemperatureUnit::Celsius),
        ),
        Route::TemperatureF => Reply::ok(
            CONTENT_TYPE_TEXT,
            state.temperature_text(TemperatureUnit::Fahrenheit),
        ),
        Route::MotorCommand => {
            match parse_motor_command(body) {
                Some(command) => {
                    if state.set_motor_command(command) {
                        info!("motor latch set to {}", command.as_str());
                    }
                }
                None => debug!("ignoring unrecognized motor command ({} bytes)", body.len()),
            }
            Reply::ok(CONTENT_TYPE_TEXT, "OK")
        }
    }
}

/// Accepts `state=ON`, `OnOff=ON` or a bare `ON` body (same for `OFF`).
/// The first field carrying a recognized value wins.
pub fn parse_motor_command(body: &[u8]) -> Option<MotorCommand> {
    if body.is_empty() || body.len() > MAX_COMMAND_BODY {
        return None;
    }
    let body = std::str::from_utf8(body).ok()?;

    if let Some(command) = MotorCommand::parse(body) {
        return Some(command);
    }

    COMMAND_FIELDS.iter().find_map(|field| {
        form_param(body, field).and_then(|value| MotorCommand::parse(&value))
    })
}

fn form_param(form: &str, key: &str) -> Option<String> {
    for pair in form.split('&') {
        let mut parts = pair.splitn(2, '=');
        let Some(name) = parts.next() else {
            continue;
        };
        let value = parts.next().unwrap_or_default();
        if name == key {
            return Some(value.replace('+', " "));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::TemperatureReading;

    fn post(state: &mut SharedState, body: &str) -> Reply {
        dispatch(Route::MotorCommand, body.as_bytes(), state)
    }

    #[test]
    fn route_table_is_grouped_by_path() {
        let table: Vec<_> = ROUTES
            .iter()
            .map(|entry| (entry.path, entry.method, entry.route))
            .collect();

        assert_eq!(
            table,
            vec![
                ("/", HttpMethod::Get, Route::Index),
                ("/", HttpMethod::Post, Route::MotorCommand),
                ("/motor", HttpMethod::Post, Route::MotorCommand),
                ("/tempC", HttpMethod::Get, Route::TemperatureC),
                ("/tempF", HttpMethod::Get, Route::TemperatureF),
            ]
        );
    }

    #[test]
    fn index_serves_page() {
        let reply = dispatch(Route::Index, b"", &mut SharedState::new());

        assert_eq!(reply.status, 200);
        assert_eq!(reply.content_type, CONTENT_TYPE_HTML);
        assert!(reply.body.contains("<title>Motor Control</title>"));
    }

    #[test]
    fn last_recognized_command_wins() {
        let mut state = SharedState::new();

        for body in ["state=ON", "state=MAYBE", "OnOff=OFF", "state=on", "ON", ""] {
            let reply = post(&mut state, body);
            assert_eq!(reply.status, 200);
            assert_eq!(reply.body, "OK");
        }

        assert_eq!(state.motor_command(), MotorCommand::On);

        post(&mut state, "state=OFF");
        post(&mut state, "state=");
        post(&mut state, "other=ON");
        assert_eq!(state.motor_command(), MotorCommand::Off);
    }

    #[test]
    fn unrecognized_command_is_acknowledged_and_ignored() {
        let mut state = SharedState::new();
        state.set_motor_command(MotorCommand::On);

        let reply = post(&mut state, "state=MAYBE");

        assert_eq!(reply.status, 200);
        assert_eq!(state.motor_command(), MotorCommand::On);
    }

    #[test]
    fn parses_form_and_bare_bodies() {
        assert_eq!(parse_motor_command(b"ON"), Some(MotorCommand::On));
        assert_eq!(parse_motor_command(b"OFF"), Some(MotorCommand::Off));
        assert_eq!(parse_motor_command(b"state=ON"), Some(MotorCommand::On));
        assert_eq!(
            parse_motor_command(b"foo=1&state=OFF"),
            Some(MotorCommand::Off)
        );
        assert_eq!(parse_motor_command(b"OnOff=ON"), Some(MotorCommand::On));
        assert_eq!(parse_motor_command(b"state=ON+"), None);
        assert_eq!(
            parse_motor_command(b"state=MAYBE&OnOff=ON"),
            Some(MotorCommand::On)
        );
        assert_eq!(
            parse_motor_command(b"state=OFF&OnOff=ON"),
            Some(MotorCommand::Off)
        );
        assert_eq!(parse_motor_command(&[0xff, 0xfe]), None);

        let oversized = format!("state=ON&pad={}", "x".repeat(MAX_COMMAND_BODY));
        assert_eq!(parse_motor_command(oversized.as_bytes()), None);
    }

    #[test]
    fn temperature_reads_are_stable_between_polls() {
        let mut state = SharedState::new();
        state.store_reading(TemperatureReading {
            celsius: Some(21.5),
            fahrenheit: Some(70.7),
        });

        let first = dispatch(Route::TemperatureC, b"", &mut state);
        let second = dispatch(Route::TemperatureC, b"", &mut state);
        let fahrenheit = dispatch(Route::TemperatureF, b"", &mut state);

        assert_eq!(first, second);
        assert_eq!(first.body, "21.5");
        assert_eq!(first.content_type, CONTENT_TYPE_TEXT);
        assert_eq!(fahrenheit.body, "70.7");
    }

    #[test]
    fn disconnected_sensor_renders_placeholder() {
        let mut state = SharedState::new();
        state.store_reading(TemperatureReading::UNAVAILABLE);

        assert_eq!(dispatch(Route::TemperatureC, b"", &mut state).body, "--");
        assert_eq!(dispatch(Route::TemperatureF, b"", &mut state).body, "--");
    }
}
