//! In-process stand-in for a VM201 board.
//!
//! Renders the same three pages the firmware serves, with indicator states
//! drawn from a seeded RNG on every status request. Lets the poller run
//! without hardware and gives tests a deterministic board.

use http::{Method, StatusCode};
use log::debug;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::cell::{Cell, RefCell};

use crate::models::vm201::{Decode, DeviceType};
use crate::transport::{Response, Transport, TransportError};

pub const SIM_MODEL: &str = "VM201";
pub const SIM_NAME: &str = "Simulated Relay Card";
pub const SIM_FIRMWARE: &str = "0.0.0-sim";
const MIN_INDICATORS: u32 = 9;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedPoint {
    pub device_type: DeviceType,
    pub device_id: u32,
    pub name: String,
}

impl SimulatedPoint {
    fn new(device_type: DeviceType, device_id: u32, name: &str) -> Self {
        SimulatedPoint {
            device_type,
            device_id,
            name: name.to_string(),
        }
    }

    fn label(&self) -> String {
        let n = self.device_id + 1;
        match self.device_type {
            DeviceType::OutputSensor => format!("Output {}", n),
            DeviceType::InputSensor => format!("Input {}", n),
            DeviceType::DoorSensor => format!("Door Sensor {}", n),
            DeviceType::TempSensor => format!("Temp Sensor {}", n),
            DeviceType::Other => format!("Analog {}", n),
        }
    }

    fn field(&self) -> String {
        let prefix = match self.device_type {
            DeviceType::OutputSensor => "out_name",
            DeviceType::InputSensor => "in_name",
            DeviceType::DoorSensor => "door_name",
            DeviceType::TempSensor => "temp_name",
            DeviceType::Other => "aux_name",
        };
        format!("{}[{}]", prefix, self.device_id)
    }
}

fn escape_attr(raw: &str) -> String {
    raw.replace('&', "&amp;").replace('"', "&quot;").replace('<', "&lt;")
}

/// Eight relay outputs, one input, one door contact, one temperature sensor.
pub fn default_layout() -> Vec<SimulatedPoint> {
    const OUTPUTS: [&str; 8] = [
        "Garden Pump",
        "Hall Light",
        "Porch Light",
        "Gate",
        "Heater",
        "Fan",
        "Sprinkler",
        "Spare",
    ];

    let mut points = OUTPUTS
        .iter()
        .zip(0u32..)
        .map(|(name, id)| SimulatedPoint::new(DeviceType::OutputSensor, id, name))
        .collect::<Vec<_>>();
    points.push(SimulatedPoint::new(DeviceType::InputSensor, 0, "Doorbell"));
    points.push(SimulatedPoint::new(DeviceType::DoorSensor, 0, "Front Door"));
    points.push(SimulatedPoint::new(DeviceType::TempSensor, 0, "Living Room"));
    points
}

pub struct SimulatedBoard {
    layout: Vec<SimulatedPoint>,
    rng: RefCell<SmallRng>,
    offline: Cell<bool>,
    reject_login: Cell<bool>,
    status_requests: Cell<u64>,
}

impl SimulatedBoard {
    pub fn new(layout: Vec<SimulatedPoint>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => SmallRng::seed_from_u64(s),
            None => SmallRng::from_os_rng(),
        };
        debug!("Simulated board: {} point(s), seed={:?}", layout.len(), seed);
        SimulatedBoard {
            layout,
            rng: RefCell::new(rng),
            offline: Cell::new(false),
            reject_login: Cell::new(false),
            status_requests: Cell::new(0),
        }
    }

    pub fn layout(&self) -> &[SimulatedPoint] {
        &self.layout
    }

    /// Every request fails at the connection level while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.set(offline);
    }

    /// The root page answers 401 while set.
    pub fn set_reject_login(&self, reject: bool) {
        self.reject_login.set(reject);
    }

    pub fn status_requests(&self) -> u64 {
        self.status_requests.get()
    }

    fn indicator_count(&self) -> u32 {
        self.layout
            .iter()
            .filter(|p| p.device_type.policy().decode == Decode::Indicator)
            .map(|p| p.device_id + 1)
            .max()
            .unwrap_or(0)
            .max(MIN_INDICATORS)
    }

    fn names_page(&self) -> String {
        let rows = self
            .layout
            .iter()
            .map(|p| {
                format!(
                    "<p>{} <input type=\"text\" name=\"{}\" value=\"{}\" maxlength=\"15\"></p>\n",
                    p.label(),
                    p.field(),
                    escape_attr(&p.name)
                )
            })
            .collect::<String>();
        format!(
            "<html><body><div id=\"content\"><form>\n<p class=\"title\">Channel names</p>\n{}</form></div>\
             <div id=\"footer\">Copyright 2010 Velleman Group</div></body></html>",
            rows
        )
    }

    fn about_page(&self) -> String {
        format!(
            "<html><body><div id=\"header\"><h1>{}</h1></div><div id=\"content\"><h2>{}</h2>\
             <p>Firmware: {}</p></div><div id=\"footer\">Copyright 2010 Velleman Group</div></body></html>",
            SIM_MODEL, SIM_NAME, SIM_FIRMWARE
        )
    }

    fn status_page(&self) -> String {
        self.status_requests.set(self.status_requests.get() + 1);
        let mut rng = self.rng.borrow_mut();
        let leds = (0..self.indicator_count())
            .map(|i| format!("<span class=\"led\" id=\"led{}\">{}</span>", i, u8::from(rng.random_bool(0.5))))
            .collect::<String>();
        format!("<html><body><div id=\"leds\">{}</div></body></html>", leds)
    }
}

impl Transport for SimulatedBoard {
    fn request(&self, method: Method, path: &str) -> Result<Response, TransportError> {
        if self.offline.get() {
            return Err(TransportError::Connection("simulated board offline".to_string()));
        }
        if method != Method::GET && method != Method::HEAD {
            return Err(TransportError::UnsupportedMethod(method));
        }

        let res = match path {
            "/" if self.reject_login.get() => Response::new(StatusCode::UNAUTHORIZED, "401 Unauthorized"),
            "/" => Response::new(StatusCode::OK, "<html><body><h1>VM201</h1></body></html>"),
            "/names.html" => Response::new(StatusCode::OK, self.names_page()),
            "/about.html" => Response::new(StatusCode::OK, self.about_page()),
            "/cgi/status.cgi" => Response::new(StatusCode::OK, self.status_page()),
            _ => Response::new(StatusCode::NOT_FOUND, "404 Not Found"),
        };
        Ok(res)
    }
}
