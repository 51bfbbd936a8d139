//! Configuration document loading.
//!
//! Translates the JSON document into validated records once at startup.
//! Required fields are fatal when missing; the only soft failure is an
//! unrecognised `ntmode`, which falls back to client mode.

use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;
use vision::{CameraSelector, VisionSettings};

pub const DEFAULT_CONFIG_PATH: &str = "/boot/frc.json";
pub const DEFAULT_STREAM_PORT: u16 = 1181;

/// Role of this process on the control plane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ControlMode {
    #[default]
    Client,
    Server,
}

/// One physical camera as declared in the document.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraRecord {
    pub name: String,
    pub path: String,
    /// The whole camera entry, forwarded verbatim to the capture side.
    pub raw_config: Value,
    pub stream_config: Option<Value>,
}

/// A virtual output whose source is picked through a control-plane key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwitchedCameraRecord {
    pub name: String,
    pub selector_key: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub path: PathBuf,
    pub team: i32,
    pub mode: ControlMode,
    pub cameras: Vec<CameraRecord>,
    pub switched: Vec<SwitchedCameraRecord>,
    pub stream_port: u16,
    pub vision: VisionSettings,
    /// Non-fatal problems found while loading; already logged.
    pub warnings: Vec<String>,
}

#[derive(Debug, Error)]
#[error("config error in '{}': {kind}", path.display())]
pub struct ParseError {
    pub path: PathBuf,
    pub kind: ParseErrorKind,
}

#[derive(Debug, Error)]
pub enum ParseErrorKind {
    #[error("cannot open file: {0}")]
    CannotOpen(#[source] io::Error),
    #[error("invalid JSON: {0}")]
    Syntax(#[source] serde_json::Error),
    #[error("not an object")]
    NotAnObject,
    #[error("could not read {0}")]
    Missing(String),
    #[error("{field}: expected {expected}")]
    Invalid {
        field: String,
        expected: &'static str,
    },
    #[error("duplicate stream name '{0}'")]
    DuplicateName(String),
    #[error("vision: {0}")]
    Vision(String),
}

/// Read and validate the document at `path`.
pub fn load(path: impl AsRef<Path>) -> Result<ServerConfig, ParseError> {
    let path = path.as_ref();
    let fail = |kind| ParseError {
        path: path.to_path_buf(),
        kind,
    };
    let text = fs::read_to_string(path).map_err(|err| fail(ParseErrorKind::CannotOpen(err)))?;
    let document: Value =
        serde_json::from_str(&text).map_err(|err| fail(ParseErrorKind::Syntax(err)))?;
    from_value(path, &document)
}

/// Validate an already parsed document; `path` is only used in messages.
pub fn from_value(path: impl AsRef<Path>, document: &Value) -> Result<ServerConfig, ParseError> {
    let path = path.as_ref();
    parse_document(path, document).map_err(|kind| ParseError {
        path: path.to_path_buf(),
        kind,
    })
}

fn parse_document(path: &Path, document: &Value) -> Result<ServerConfig, ParseErrorKind> {
    let Some(obj) = document.as_object() else {
        return Err(ParseErrorKind::NotAnObject);
    };
    let mut warnings = Vec::new();

    let team = match obj.get("team") {
        None | Some(Value::Null) => return Err(ParseErrorKind::Missing("team number".into())),
        Some(value) => read_team(value)?,
    };

    let mut mode = ControlMode::default();
    if let Some(value) = obj.get("ntmode") {
        let raw = scalar_string(value).unwrap_or_else(|| value.to_string());
        if raw.eq_ignore_ascii_case("client") {
            mode = ControlMode::Client;
        } else if raw.eq_ignore_ascii_case("server") {
            mode = ControlMode::Server;
        } else {
            let message = format!("could not understand ntmode value '{raw}'");
            warn!("config error in '{}': {message}", path.display());
            warnings.push(message);
        }
    }

    let cameras = match obj.get("cameras") {
        None | Some(Value::Null) => return Err(ParseErrorKind::Missing("cameras".into())),
        Some(Value::Array(entries)) => entries
            .iter()
            .enumerate()
            .map(|(index, entry)| read_camera(index, entry))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(ParseErrorKind::Invalid {
                field: "cameras".into(),
                expected: "an array",
            });
        }
    };

    let switched = match obj.get("switched cameras") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(entries)) => entries
            .iter()
            .enumerate()
            .map(|(index, entry)| read_switched_camera(index, entry))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(ParseErrorKind::Invalid {
                field: "switched cameras".into(),
                expected: "an array",
            });
        }
    };

    let stream_port = match obj.get("stream port") {
        None | Some(Value::Null) => DEFAULT_STREAM_PORT,
        Some(value) => value
            .as_u64()
            .and_then(|port| u16::try_from(port).ok())
            .filter(|port| *port > 0)
            .ok_or_else(|| ParseErrorKind::Invalid {
                field: "stream port".into(),
                expected: "a TCP port number",
            })?,
    };

    let vision = match obj.get("vision") {
        None | Some(Value::Null) => VisionSettings::default(),
        Some(value) => {
            let settings: VisionSettings = serde_json::from_value(value.clone())
                .map_err(|err| ParseErrorKind::Vision(err.to_string()))?;
            settings
                .validate()
                .map_err(|err| ParseErrorKind::Vision(err.to_string()))?;
            settings
        }
    };

    // With no cameras at all the loop is skipped at startup instead.
    if vision.enabled && !cameras.is_empty() {
        check_vision_camera(&vision.camera, &cameras)?;
    }

    let mut names = HashSet::new();
    let stream_names = cameras
        .iter()
        .map(|c| &c.name)
        .chain(switched.iter().map(|s| &s.name))
        .chain(vision.enabled.then_some(&vision.output));
    for name in stream_names {
        if !names.insert(name.as_str()) {
            return Err(ParseErrorKind::DuplicateName(name.clone()));
        }
    }

    Ok(ServerConfig {
        path: path.to_path_buf(),
        team,
        mode,
        cameras,
        switched,
        stream_port,
        vision,
        warnings,
    })
}

fn check_vision_camera(
    selector: &CameraSelector,
    cameras: &[CameraRecord],
) -> Result<(), ParseErrorKind> {
    let known = match selector {
        CameraSelector::Index(index) => *index < cameras.len(),
        CameraSelector::Name(name) => cameras.iter().any(|c| c.name == *name),
    };
    if known {
        return Ok(());
    }
    Err(ParseErrorKind::Vision(match selector {
        CameraSelector::Index(index) => format!(
            "camera {index} is out of range ({} camera(s) configured)",
            cameras.len()
        ),
        CameraSelector::Name(name) => format!("camera '{name}' is not a configured camera"),
    }))
}

fn read_team(value: &Value) -> Result<i32, ParseErrorKind> {
    let invalid = || ParseErrorKind::Invalid {
        field: "team".into(),
        expected: "an integer team number",
    };
    let Value::Number(number) = value else {
        return Err(invalid());
    };
    let team = match number.as_i64() {
        Some(team) => team,
        None => number.as_f64().map(|f| f.trunc() as i64).ok_or_else(invalid)?,
    };
    i32::try_from(team).map_err(|_| invalid())
}

/// String form of a JSON scalar; objects, arrays and null have none.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn entry_object<'a>(
    list: &str,
    index: usize,
    entry: &'a Value,
) -> Result<&'a Map<String, Value>, ParseErrorKind> {
    entry.as_object().ok_or_else(|| ParseErrorKind::Invalid {
        field: format!("{list}[{index}]"),
        expected: "an object",
    })
}

fn read_camera(index: usize, entry: &Value) -> Result<CameraRecord, ParseErrorKind> {
    let obj = entry_object("cameras", index, entry)?;
    let name = obj
        .get("name")
        .and_then(scalar_string)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ParseErrorKind::Missing("camera name".into()))?;
    let path = obj
        .get("path")
        .and_then(scalar_string)
        .ok_or_else(|| ParseErrorKind::Missing(format!("path of camera '{name}'")))?;

    Ok(CameraRecord {
        name,
        path,
        raw_config: entry.clone(),
        stream_config: obj.get("stream").filter(|v| !v.is_null()).cloned(),
    })
}

fn read_switched_camera(
    index: usize,
    entry: &Value,
) -> Result<SwitchedCameraRecord, ParseErrorKind> {
    let obj = entry_object("switched cameras", index, entry)?;
    let name = obj
        .get("name")
        .and_then(scalar_string)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ParseErrorKind::Missing("switched camera name".into()))?;
    let selector_key = obj
        .get("key")
        .and_then(scalar_string)
        .ok_or_else(|| ParseErrorKind::Missing(format!("key of switched camera '{name}'")))?;
    Ok(SwitchedCameraRecord { name, selector_key })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde_json::json;
    use tempfile::NamedTempFile;

    use super::*;

    fn parse(document: Value) -> Result<ServerConfig, ParseError> {
        from_value("/boot/frc.json", &document)
    }

    fn kind(document: Value) -> ParseErrorKind {
        parse(document).expect_err("document should be rejected").kind
    }

    fn minimal() -> Value {
        json!({
            "team": 3719,
            "cameras": [
                { "name": "front", "path": "/dev/video0", "fps": 30 },
                { "name": "rear", "path": "/dev/video1", "stream": { "properties": [] } }
            ]
        })
    }

    #[test]
    fn loads_minimal_document_in_order() {
        let config = parse(minimal()).unwrap();
        assert_eq!(config.team, 3719);
        assert_eq!(config.mode, ControlMode::Client);
        assert_eq!(config.stream_port, DEFAULT_STREAM_PORT);
        let names: Vec<_> = config.cameras.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["front", "rear"]);
        assert!(config.switched.is_empty());
        assert!(config.warnings.is_empty());
        assert_eq!(config.vision, VisionSettings::default());
    }

    #[test]
    fn camera_entry_is_forwarded_verbatim() {
        let mut doc = minimal();
        doc["cameras"][0]["vendor knob"] = json!({ "nested": [1, 2, 3] });
        let config = parse(doc.clone()).unwrap();
        assert_eq!(config.cameras[0].raw_config, doc["cameras"][0]);
        assert_eq!(config.cameras[0].stream_config, None);
        assert_eq!(
            config.cameras[1].stream_config,
            Some(json!({ "properties": [] }))
        );
    }

    #[test]
    fn missing_team_is_fatal() {
        let mut doc = minimal();
        doc.as_object_mut().unwrap().remove("team");
        let err = parse(doc).unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::Missing(ref f) if f == "team number"));
        assert_eq!(
            err.to_string(),
            "config error in '/boot/frc.json': could not read team number"
        );
    }

    #[test]
    fn non_numeric_team_is_fatal() {
        let mut doc = minimal();
        doc["team"] = json!("thirty-seven");
        assert!(matches!(kind(doc), ParseErrorKind::Invalid { .. }));
    }

    #[test]
    fn ntmode_is_case_insensitive() {
        let mut doc = minimal();
        doc["ntmode"] = json!("SERVER");
        assert_eq!(parse(doc).unwrap().mode, ControlMode::Server);
    }

    #[test]
    fn unknown_ntmode_only_warns() {
        let mut doc = minimal();
        doc["ntmode"] = json!("peer");
        let config = parse(doc).unwrap();
        assert_eq!(config.mode, ControlMode::Client);
        assert_eq!(config.warnings.len(), 1);
        assert!(config.warnings[0].contains("peer"));
    }

    #[test]
    fn top_level_must_be_object() {
        assert!(matches!(kind(json!([1, 2])), ParseErrorKind::NotAnObject));
    }

    #[test]
    fn cameras_are_required_and_must_be_an_array() {
        assert!(matches!(
            kind(json!({ "team": 1 })),
            ParseErrorKind::Missing(ref f) if f == "cameras"
        ));
        assert!(matches!(
            kind(json!({ "team": 1, "cameras": {} })),
            ParseErrorKind::Invalid { .. }
        ));
    }

    #[test]
    fn one_bad_camera_rejects_the_whole_load() {
        let mut doc = minimal();
        doc["cameras"]
            .as_array_mut()
            .unwrap()
            .push(json!({ "name": "side" }));
        assert!(matches!(
            kind(doc),
            ParseErrorKind::Missing(ref f) if f == "path of camera 'side'"
        ));

        let mut doc = minimal();
        doc["cameras"][0] = json!({ "path": "/dev/video0" });
        assert!(matches!(
            kind(doc),
            ParseErrorKind::Missing(ref f) if f == "camera name"
        ));
    }

    #[test]
    fn switched_cameras_need_name_and_key() {
        let mut doc = minimal();
        doc["switched cameras"] = json!([{ "name": "driver", "key": "driver-cam" }]);
        let config = parse(doc.clone()).unwrap();
        assert_eq!(
            config.switched,
            vec![SwitchedCameraRecord {
                name: "driver".into(),
                selector_key: "driver-cam".into(),
            }]
        );

        doc["switched cameras"] = json!([{ "name": "driver" }]);
        assert!(matches!(
            kind(doc),
            ParseErrorKind::Missing(ref f) if f == "key of switched camera 'driver'"
        ));
    }

    #[test]
    fn stream_names_must_be_unique() {
        let mut doc = minimal();
        doc["switched cameras"] = json!([{ "name": "front", "key": "k" }]);
        assert!(matches!(kind(doc), ParseErrorKind::DuplicateName(ref n) if n == "front"));
    }

    #[test]
    fn vision_section_is_deserialised_and_validated() {
        let mut doc = minimal();
        doc["vision"] = json!({ "camera": "rear", "target width": 12.5, "calibration": 0.25 });
        let config = parse(doc.clone()).unwrap();
        assert_eq!(config.vision.camera, CameraSelector::Name("rear".into()));
        assert_eq!(config.vision.calibration().target_width, 12.5);

        doc["vision"] = json!({ "width": 0 });
        assert!(matches!(kind(doc), ParseErrorKind::Vision(_)));
    }

    #[test]
    fn vision_camera_index_must_exist() {
        let mut doc = minimal();
        doc["vision"] = json!({ "camera": 1 });
        assert_eq!(parse(doc.clone()).unwrap().vision.camera, CameraSelector::Index(1));

        doc["vision"] = json!({ "camera": 7 });
        let err = parse(doc.clone()).unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::Vision(ref m) if m.contains("camera 7")));

        // A disabled loop never opens its camera.
        doc["vision"] = json!({ "enabled": false, "camera": 7 });
        assert!(parse(doc).is_ok());
    }

    #[test]
    fn vision_camera_name_must_exist() {
        let mut doc = minimal();
        doc["vision"] = json!({ "camera": "side" });
        assert!(matches!(
            kind(doc),
            ParseErrorKind::Vision(ref m) if m == "camera 'side' is not a configured camera"
        ));
    }

    #[test]
    fn vision_camera_is_not_checked_without_cameras() {
        let config = parse(json!({ "team": 1, "cameras": [] })).unwrap();
        assert!(config.vision.enabled);
        assert!(config.cameras.is_empty());
    }

    #[test]
    fn stream_port_override() {
        let mut doc = minimal();
        doc["stream port"] = json!(5800);
        assert_eq!(parse(doc.clone()).unwrap().stream_port, 5800);
        doc["stream port"] = json!(70000);
        assert!(matches!(kind(doc), ParseErrorKind::Invalid { .. }));
    }

    #[test]
    fn reads_document_from_disk() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", minimal()).unwrap();
        let config = load(file.path()).unwrap();
        assert_eq!(config.path, file.path());
        assert_eq!(config.cameras.len(), 2);
    }

    #[test]
    fn unreadable_file_is_reported() {
        let err = load("/nonexistent/frc.json").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::CannotOpen(_)));
        assert!(err.to_string().contains("cannot open file"));
    }

    #[test]
    fn malformed_json_is_reported() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ \"team\": ").unwrap();
        assert!(matches!(
            load(file.path()).unwrap_err().kind,
            ParseErrorKind::Syntax(_)
        ));
    }
}
