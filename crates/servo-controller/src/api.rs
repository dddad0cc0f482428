//! Request handlers for the web layer.
//!
//! Each handler takes the shared controller plus the decoded JSON body and
//! returns an HTTP-style status code with a JSON body, so any server framework
//! can route to them without knowing about controller errors.

use serde::Serialize;
use serde_json::{json, Value};
use servo_link::ServoLink;

use crate::{BatchStatus, ControllerError, DeviceController};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    pub code: u16,
    pub body: Value,
}

impl ApiResponse {
    fn ok(body: Value) -> Self {
        Self { code: 200, body }
    }

    fn error(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            body: json!({ "status": "error", "message": message.into() }),
        }
    }

    fn from_error(e: &ControllerError) -> Self {
        Self::error(e.status_code(), e.to_string())
    }

    pub fn is_success(&self) -> bool {
        self.code == 200
    }
}

const INVALID_NUMBERS: &str = "invalid data, send numbers";

/// First present key among `keys`, as an integer. Numeric strings are accepted.
fn int_field(body: &Value, keys: &[&str]) -> Option<Result<i64, ()>> {
    let v = keys.iter().find_map(|k| body.get(*k))?;
    let parsed = match v {
        Value::Number(n) => n.as_i64().ok_or(()),
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| ()),
        _ => Err(()),
    };
    Some(parsed)
}

pub fn status<L: ServoLink>(ctl: &DeviceController<L>) -> ApiResponse {
    let connected = ctl.is_connected();
    let port = ctl.link_config().port;
    ApiResponse::ok(json!({
        "status": if connected { "connected" } else { "disconnected" },
        "connected": connected,
        "configured_address": port,
        "port": port,
    }))
}

/// Body: `{"port"?: string, "baud_rate"?: int}`.
pub fn connect<L: ServoLink>(ctl: &DeviceController<L>, body: &Value) -> ApiResponse {
    let port = match body.get("port").or_else(|| body.get("address")) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return ApiResponse::error(400, "port must be a string"),
    };
    let baud_rate = match int_field(body, &["baud_rate"]) {
        None => None,
        Some(Ok(b)) => match u32::try_from(b) {
            Ok(b) => Some(b),
            Err(_) => return ApiResponse::error(400, "baud_rate out of range"),
        },
        Some(Err(())) => return ApiResponse::error(400, INVALID_NUMBERS),
    };
    if port.is_some() || baud_rate.is_some() {
        if let Err(e) = ctl.reconfigure(port, baud_rate, None) {
            return ApiResponse::from_error(&e);
        }
    }
    match ctl.connect() {
        Ok(link) => ApiResponse::ok(json!({
            "status": "success",
            "message": format!("Connected to servo board on {}", link.port),
        })),
        Err(e) => ApiResponse::from_error(&e),
    }
}

pub fn disconnect<L: ServoLink>(ctl: &DeviceController<L>) -> ApiResponse {
    match ctl.disconnect() {
        Ok(()) => ApiResponse::ok(json!({ "status": "success", "message": "Disconnected" })),
        Err(e) => ApiResponse::from_error(&e),
    }
}

/// Body: `{"address": int, "angle": int}` (`servo_id` is accepted for `address`).
pub fn move_actuator<L: ServoLink>(ctl: &DeviceController<L>, body: &Value) -> ApiResponse {
    let address = int_field(body, &["address", "servo_id"]);
    let angle = int_field(body, &["angle"]);
    let (Some(Ok(address)), Some(Ok(angle))) = (address, angle) else {
        return ApiResponse::error(400, INVALID_NUMBERS);
    };
    match ctl.move_actuator(address, angle) {
        Ok(message) => ApiResponse::ok(json!({
            "status": "success",
            "address": address,
            "angle": angle,
            "message": message,
        })),
        Err(e) => ApiResponse::from_error(&e),
    }
}

/// Body: `{"angle"?: int}`; defaults to the configured neutral angle.
pub fn reset_all<L: ServoLink>(ctl: &DeviceController<L>, body: &Value) -> ApiResponse {
    let report = match int_field(body, &["angle"]) {
        None => ctl.reset_all(),
        Some(Ok(angle)) => match ctl.reset_all_to(angle) {
            Ok(r) => r,
            Err(e) => return ApiResponse::from_error(&e),
        },
        Some(Err(())) => return ApiResponse::error(400, INVALID_NUMBERS),
    };
    match report.status() {
        BatchStatus::AllSucceeded => ApiResponse::ok(json!({
            "status": "success",
            "message": "All servos have been reset",
        })),
        outcome => ApiResponse {
            code: 500,
            body: json!({
                "status": "error",
                "outcome": outcome,
                "message": "Error resetting some servos",
                "failed": report.failed(),
                "details": report.entries,
            }),
        },
    }
}

pub fn diagnostics<L: ServoLink>(ctl: &DeviceController<L>) -> ApiResponse {
    match serde_json::to_value(ctl.get_diagnostics()) {
        Ok(v) => ApiResponse::ok(v),
        Err(e) => ApiResponse::error(500, format!("diagnostics unavailable: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ControllerConfig;
    use servo_link::{MockHandle, MockLink};

    fn controller(port: Option<&str>) -> (DeviceController<MockLink>, MockHandle) {
        let (link, handle) = MockLink::with_handle();
        let mut cfg = ControllerConfig::default();
        cfg.link.port = port.map(str::to_string);
        (DeviceController::new(link, &cfg).with_sleeper(|_| {}), handle)
    }

    #[test]
    fn status_reflects_connection() {
        let (ctl, _h) = controller(Some("mock0"));
        let r = status(&ctl);
        assert_eq!(r.body["connected"], false);
        assert_eq!(r.body["configured_address"], "mock0");
        assert_eq!(r.body["port"], "mock0");
        ctl.connect().unwrap();
        assert_eq!(status(&ctl).body["status"], "connected");
    }

    #[test]
    fn connect_reconfigures_first() {
        let (ctl, handle) = controller(None);
        let r = connect(&ctl, &json!({ "port": "/dev/ttyACM1", "baud_rate": 115200 }));
        assert!(r.is_success(), "{r:?}");
        assert_eq!(r.body["message"], "Connected to servo board on /dev/ttyACM1");
        let cfg = handle.last_config().unwrap();
        assert_eq!(cfg.port, "/dev/ttyACM1");
        assert_eq!(cfg.baud_rate, 115_200);
    }

    #[test]
    fn connect_failures() {
        let (ctl, handle) = controller(None);
        assert_eq!(connect(&ctl, &json!({})).code, 400);
        assert_eq!(connect(&ctl, &json!({ "port": 5 })).code, 400);
        assert_eq!(connect(&ctl, &json!({ "port": "x", "baud_rate": "fast" })).code, 400);

        handle.fail_next_opens(100);
        let r = connect(&ctl, &json!({ "port": "mock0" }));
        assert_eq!(r.code, 500);
        assert_eq!(r.body["status"], "error");
    }

    #[test]
    fn move_maps_errors_to_codes() {
        let (ctl, handle) = controller(Some("mock0"));
        let ok = move_actuator(&ctl, &json!({ "address": 2, "angle": 90 }));
        assert!(ok.is_success());
        assert_eq!(ok.body["address"], 2);

        let legacy = move_actuator(&ctl, &json!({ "servo_id": "3", "angle": "45" }));
        assert!(legacy.is_success());

        let bad = move_actuator(&ctl, &json!({ "address": "two", "angle": 90 }));
        assert_eq!(bad.code, 400);
        assert_eq!(bad.body["message"], INVALID_NUMBERS);
        assert_eq!(move_actuator(&ctl, &json!({ "angle": 90 })).code, 400);

        let angle = move_actuator(&ctl, &json!({ "address": 2, "angle": 200 }));
        assert_eq!(angle.code, 400);
        assert!(angle.body["message"].as_str().unwrap().contains("angle"));
        let addr = move_actuator(&ctl, &json!({ "address": 40, "angle": 20 }));
        assert_eq!(addr.code, 400);
        assert!(addr.body["message"].as_str().unwrap().contains("address"));

        handle.fail_all_writes(true);
        assert_eq!(move_actuator(&ctl, &json!({ "address": 2, "angle": 1 })).code, 500);
    }

    #[test]
    fn reset_reports_details_on_partial_failure() {
        let (ctl, handle) = controller(Some("mock0"));
        assert!(reset_all(&ctl, &json!({})).is_success());

        handle.fail_writes_of(b"12,90\n");
        let r = reset_all(&ctl, &Value::Null);
        assert_eq!(r.code, 500);
        assert_eq!(r.body["outcome"], "partial_failure");
        assert_eq!(r.body["failed"], json!([12]));
        assert_eq!(r.body["details"].as_array().map(Vec::len), Some(30));
        assert_eq!(r.body["details"][10]["address"], 12);
        assert_eq!(r.body["details"][10]["ok"], false);

        assert_eq!(reset_all(&ctl, &json!({ "angle": 500 })).code, 400);
    }

    #[test]
    fn diagnostics_body_lists_ports() {
        let (ctl, _h) = controller(Some("mock0"));
        let r = diagnostics(&ctl);
        assert!(r.is_success());
        assert_eq!(r.body["ports"][0]["device"], "mock0");
        assert_eq!(r.body["state"]["state"], "disconnected");
        assert_eq!(disconnect(&ctl).code, 200);
    }
}
