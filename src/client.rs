//! Discovery and polling client for the VM201 board.
//!
//! - Blocking, one request per operation; never reentrant.
//! - Discovery reads `/names.html`, refresh reads `/cgi/status.cgi`,
//!   controller metadata comes from `/about.html`.
//! - Every operation is all-or-nothing: a failed call returns no partial
//!   catalog and leaves caller-owned devices untouched.

use http::{Method, StatusCode};
use log::{debug, info};

use crate::models::vm201::*;
use crate::parser::{self, Page, ParseError};
use crate::transport::{HttpTransport, Transport, TransportError};

pub const DEFAULT_CONTROLLER_NAME: &str = "VM201";

#[derive(Debug)]
pub enum Vm201Error {
    /// Root page answered with something other than 200.
    Auth { status: StatusCode },
    Transport(TransportError),
    Http { path: &'static str, status: StatusCode },
    Parse(ParseError),
}

impl core::fmt::Display for Vm201Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Vm201Error::Auth { status } => {
                write!(f, "auth error: board answered {} (invalid username or password?)", status)
            }
            Vm201Error::Transport(e) => write!(f, "transport error: {}", e),
            Vm201Error::Http { path, status } => write!(f, "http {} for {}", status, path),
            Vm201Error::Parse(e) => write!(f, "parse error: {}", e),
        }
    }
}

impl std::error::Error for Vm201Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Vm201Error::Transport(e) => Some(e),
            Vm201Error::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for Vm201Error {
    fn from(value: TransportError) -> Self {
        Vm201Error::Transport(value)
    }
}

impl From<ParseError> for Vm201Error {
    fn from(value: ParseError) -> Self {
        Vm201Error::Parse(value)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

pub struct Vm201Client<T: Transport = HttpTransport> {
    transport: T,
    controller_name: String,
    state: ConnectionState,
}

impl<T: Transport> Vm201Client<T> {
    pub fn new(transport: T, controller_name: impl Into<String>) -> Self {
        Vm201Client {
            transport,
            controller_name: controller_name.into(),
            state: ConnectionState::Disconnected,
        }
    }

    pub fn controller_name(&self) -> &str {
        &self.controller_name
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Request `/`. Only an exact 200 counts as connected.
    pub fn connect(&mut self) -> Result<(), Vm201Error> {
        self.state = ConnectionState::Disconnected;
        let res = self.transport.request(Method::GET, "/")?;
        if res.status != StatusCode::OK {
            return Err(Vm201Error::Auth { status: res.status });
        }
        self.state = ConnectionState::Connected;
        info!("Connected to {}", self.controller_name);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Connected {
            debug!("Disconnected from {}", self.controller_name);
        }
        self.state = ConnectionState::Disconnected;
    }

    fn fetch(&self, page: Page) -> Result<String, Vm201Error> {
        let path = page.path();
        let res = self.transport.request(Method::GET, path)?;
        if !res.status.is_success() {
            return Err(Vm201Error::Http {
                path,
                status: res.status,
            });
        }
        Ok(res.text())
    }

    /// Build the device catalog from the names page, in document order.
    ///
    /// States are placeholders; nothing live is queried here.
    pub fn discover(&self) -> Result<Vec<Device>, Vm201Error> {
        let html = self.fetch(Page::Names)?;
        let devices = parser::parse_names(&html)?
            .into_iter()
            .map(|r| {
                let device_type = DeviceType::from_token(&r.type_token);
                Device::discovered(&self.controller_name, device_type, r.device_id, &r.raw_name)
            })
            .collect::<Vec<_>>();
        debug!("Discovered {} device(s) on {}", devices.len(), self.controller_name);
        Ok(devices)
    }

    pub fn get_info(&self) -> Result<ControllerInfo, Vm201Error> {
        let about = parser::parse_about(&self.fetch(Page::About)?)?;
        Ok(ControllerInfo {
            name: about.name,
            manufacturer: about.manufacturer,
            model: about.model,
            version: about.version,
        })
    }

    /// Fetch the status page once and decode the state of every device that has one.
    /// Devices whose type retains its value are absent from the result.
    pub fn poll_states(&self, devices: &[Device]) -> Result<StateMap, Vm201Error> {
        let status = parser::parse_status(&self.fetch(Page::Status)?)?;

        let mut states = StateMap::new();
        for device in devices {
            let state = match device.device_type.policy().decode {
                Decode::Indicator => DeviceState::Binary(status.indicator(device.device_id)?),
                Decode::AlwaysOff => DeviceState::Binary(false),
                Decode::Retain => continue,
            };
            states.insert(device.device_unique_id.clone(), state);
        }
        Ok(states)
    }

    /// Poll and merge in one step. On error no device is modified.
    pub fn refresh(&self, devices: &mut [Device]) -> Result<Vec<StateChange>, Vm201Error> {
        let states = self.poll_states(devices)?;
        Ok(apply_states(devices, &states))
    }
}

/// Merge decoded states into the catalog, returning what actually changed.
pub fn apply_states(devices: &mut [Device], states: &StateMap) -> Vec<StateChange> {
    let mut changes = Vec::new();
    for device in devices.iter_mut() {
        let Some(&current) = states.get(&device.device_unique_id) else {
            continue;
        };
        if device.state != current {
            changes.push(StateChange {
                unique_id: device.device_unique_id.clone(),
                previous: device.state,
                current,
            });
            device.state = current;
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Response;
    use std::cell::{Cell, RefCell};
    use std::collections::BTreeMap;

    /// Serves captured pages; unknown paths are 404.
    struct FixtureBoard {
        pages: RefCell<BTreeMap<&'static str, (StatusCode, String)>>,
        offline: Cell<bool>,
        requests: RefCell<Vec<String>>,
    }

    impl FixtureBoard {
        fn new() -> Self {
            let board = FixtureBoard {
                pages: RefCell::new(BTreeMap::new()),
                offline: Cell::new(false),
                requests: RefCell::new(Vec::new()),
            };
            board.serve("/", StatusCode::OK, "<html><body>VM201</body></html>");
            board.serve("/names.html", StatusCode::OK, &fixture("names.html"));
            board.serve("/about.html", StatusCode::OK, &fixture("about.html"));
            board.serve("/cgi/status.cgi", StatusCode::OK, &fixture("status.html"));
            board
        }

        fn serve(&self, path: &'static str, status: StatusCode, body: &str) {
            self.pages.borrow_mut().insert(path, (status, body.to_string()));
        }

        fn requests_to(&self, path: &str) -> usize {
            self.requests.borrow().iter().filter(|p| p.as_str() == path).count()
        }
    }

    impl Transport for FixtureBoard {
        fn request(&self, _method: Method, path: &str) -> Result<Response, TransportError> {
            self.requests.borrow_mut().push(path.to_string());
            if self.offline.get() {
                return Err(TransportError::Connection("connection refused".into()));
            }
            Ok(match self.pages.borrow().get(path) {
                Some((status, body)) => Response::new(*status, body.as_bytes()),
                None => Response::new(StatusCode::NOT_FOUND, "not found"),
            })
        }
    }

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/data/{}", name)).expect("fixture present")
    }

    fn client() -> Vm201Client<FixtureBoard> {
        Vm201Client::new(FixtureBoard::new(), DEFAULT_CONTROLLER_NAME)
    }

    fn status_page(indicators: &[&str]) -> String {
        let leds = indicators
            .iter()
            .map(|v| format!("<span class=\"led\">{}</span>", v))
            .collect::<String>();
        format!("<html><body><div id=\"leds\">{}</div></body></html>", leds)
    }

    #[test]
    fn connect_requires_exact_200() {
        let mut c = client();
        c.connect().expect("connect");
        assert_eq!(c.state(), ConnectionState::Connected);

        for status in [StatusCode::UNAUTHORIZED, StatusCode::NO_CONTENT, StatusCode::FOUND] {
            c.transport().serve("/", status, "");
            let err = c.connect().expect_err("non-200 must fail");
            assert!(matches!(err, Vm201Error::Auth { status: s } if s == status));
            assert_eq!(c.state(), ConnectionState::Disconnected);
        }
    }

    #[test]
    fn connect_surfaces_transport_failures() {
        let mut c = client();
        c.transport().offline.set(true);
        assert!(matches!(c.connect(), Err(Vm201Error::Transport(_))));
        assert!(!c.is_connected());
    }

    #[test]
    fn disconnect_is_local() {
        let mut c = client();
        c.connect().expect("connect");
        let before = c.transport().requests.borrow().len();
        c.disconnect();
        c.disconnect();
        assert_eq!(c.state(), ConnectionState::Disconnected);
        assert_eq!(c.transport().requests.borrow().len(), before);
    }

    #[test]
    fn discovers_catalog_in_document_order() {
        let devices = client().discover().expect("discover");
        let ids = devices.iter().map(|d| d.device_unique_id.as_str()).collect::<Vec<_>>();
        assert_eq!(
            ids,
            vec![
                "VM201_O0", "VM201_O1", "VM201_O2", "VM201_O3", "VM201_O4", "VM201_O5", "VM201_O6", "VM201_O7",
                "VM201_I0", "VM201_D3", "VM201_T0",
            ]
        );
        assert_eq!(
            devices[9],
            Device {
                device_id: 3,
                device_unique_id: "VM201_D3".into(),
                device_type: DeviceType::DoorSensor,
                name: "Front_Door".into(),
                state: DeviceState::Binary(false),
            }
        );
        assert_eq!(devices[0].name, "Garden_Pump");
        assert_eq!(devices[1].name, "OutputSensor1");
        assert_eq!(devices[10].name, "Living_Room");
        assert_eq!(devices[10].state, DeviceState::Level(i64::MIN));
        assert_eq!(client().discover().expect("discover again"), devices);
    }

    #[test]
    fn discovery_keeps_duplicates_and_unknown_types() {
        let c = client();
        c.transport().serve(
            "/names.html",
            StatusCode::OK,
            r#"<div id="content">
                <p>Relay A <input name="r[1]" value="x"></p>
                <p>Relay B <input name="r[1]" value="y"></p>
            </div>"#,
        );
        let devices = c.discover().expect("discover");
        assert_eq!(devices.len(), 2);
        assert!(devices.iter().all(|d| d.device_unique_id == "VM201_Z1"));
        assert!(devices.iter().all(|d| d.device_type == DeviceType::Other));
    }

    #[test]
    fn discovery_is_all_or_nothing() {
        let c = client();
        c.transport().serve(
            "/names.html",
            StatusCode::OK,
            r#"<div id="content">
                <p>Output 1 <input name="out_name[0]" value="a"></p>
                <p>Output 2 <input name="broken" value="b"></p>
            </div>"#,
        );
        assert!(matches!(
            c.discover(),
            Err(Vm201Error::Parse(ParseError::InvalidFieldName(_)))
        ));

        c.transport().serve("/names.html", StatusCode::INTERNAL_SERVER_ERROR, "");
        assert!(matches!(
            c.discover(),
            Err(Vm201Error::Http {
                path: "/names.html",
                ..
            })
        ));
    }

    #[test]
    fn reads_controller_info() {
        let info = client().get_info().expect("info");
        assert_eq!(
            info,
            ControllerInfo {
                name: "Ethernet Relay Card".into(),
                manufacturer: "Velleman Group".into(),
                model: "VM201".into(),
                version: "1.2.3".into(),
            }
        );
    }

    #[test]
    fn refresh_decodes_per_type() {
        let c = client();
        let mut devices = c.discover().expect("discover");
        let changes = c.refresh(&mut devices).expect("refresh");

        let state = |uid: &str| find_device(&devices, uid).map(|d| d.state);
        assert_eq!(state("VM201_O0"), Some(DeviceState::Binary(true)));
        assert_eq!(state("VM201_O1"), Some(DeviceState::Binary(false)));
        assert_eq!(state("VM201_O2"), Some(DeviceState::Binary(true)));
        assert_eq!(state("VM201_O7"), Some(DeviceState::Binary(true)));
        // indicator 3 is off
        assert_eq!(state("VM201_D3"), Some(DeviceState::Binary(false)));
        // input stays off even though indicator 8 is lit
        assert_eq!(state("VM201_I0"), Some(DeviceState::Binary(false)));
        assert_eq!(state("VM201_T0"), Some(DeviceState::Level(i64::MIN)));

        let changed = changes.iter().map(|c| c.unique_id.as_str()).collect::<Vec<_>>();
        assert_eq!(changed, vec!["VM201_O0", "VM201_O2", "VM201_O7"]);
        assert_eq!(c.transport().requests_to("/cgi/status.cgi"), 1);
    }

    #[test]
    fn output_reads_indicator_at_its_id() {
        let c = client();
        c.transport()
            .serve("/cgi/status.cgi", StatusCode::OK, &status_page(&["1", "0", "1", "0"]));
        let mut devices = vec![Device::discovered("VM201", DeviceType::OutputSensor, 2, "Pump")];
        c.refresh(&mut devices).expect("refresh");
        assert_eq!(devices[0].state, DeviceState::Binary(true));
    }

    #[test]
    fn refresh_is_idempotent() {
        let c = client();
        let mut devices = c.discover().expect("discover");
        c.refresh(&mut devices).expect("first refresh");
        let after_first = devices.clone();
        let changes = c.refresh(&mut devices).expect("second refresh");
        assert!(changes.is_empty());
        assert_eq!(devices, after_first);
    }

    #[test]
    fn failed_refresh_leaves_devices_untouched() {
        let c = client();
        let mut devices = c.discover().expect("discover");
        c.refresh(&mut devices).expect("refresh");
        let before = devices.clone();

        c.transport().offline.set(true);
        assert!(matches!(c.refresh(&mut devices), Err(Vm201Error::Transport(_))));
        assert_eq!(devices, before);
        c.transport().offline.set(false);

        c.transport().serve("/cgi/status.cgi", StatusCode::OK, "<html><body></body></html>");
        assert!(matches!(c.refresh(&mut devices), Err(Vm201Error::Parse(_))));
        assert_eq!(devices, before);

        // too few indicators for O7: nothing is applied, not even O0
        c.transport()
            .serve("/cgi/status.cgi", StatusCode::OK, &status_page(&["0", "0", "0"]));
        assert!(matches!(
            c.refresh(&mut devices),
            Err(Vm201Error::Parse(ParseError::MissingIndicator { index: 3, .. }))
        ));
        assert_eq!(devices, before);
    }

    #[test]
    fn poll_states_leaves_catalog_untouched() {
        let c = client();
        let devices = c.discover().expect("discover");
        let states = c.poll_states(&devices).expect("poll");
        assert_eq!(states.get("VM201_O0"), Some(&DeviceState::Binary(true)));
        assert!(!states.contains_key("VM201_T0"));
        assert!(devices.iter().all(|d| d.state == d.device_type.policy().initial));
    }
}
