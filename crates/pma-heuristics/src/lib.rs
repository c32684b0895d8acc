use serde::{Deserialize, Serialize};

/// The telemetry channels the threshold rules inspect. Units arrive as
/// ingested (°C, %, psi) and are compared unconverted.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Snapshot {
    pub engine_temp: f64,
    pub battery_level: f64,
    pub brake_wear: f64,
    pub tire_pressure_fl: f64,
    pub tire_pressure_fr: f64,
}

/// Evaluate the fixed threshold rules and return the triggered anomaly
/// strings. Rules are independent and fire in a stable order: engine
/// temperature, battery level, brake wear, front tire pressure.
pub fn evaluate(snapshot: &Snapshot) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();

    if snapshot.engine_temp > 105.0 {
        out.push(format!(
            "High Engine Temperature: {}°C",
            snapshot.engine_temp
        ));
    }
    if snapshot.battery_level < 20.0 {
        out.push(format!("Low Battery Level: {}%", snapshot.battery_level));
    }
    if snapshot.brake_wear > 80.0 {
        out.push(format!("Critical Brake Wear: {}%", snapshot.brake_wear));
    }
    if snapshot.tire_pressure_fl < 30.0 || snapshot.tire_pressure_fr < 30.0 {
        out.push("Low Tire Pressure (Front)".to_string());
    }

    out
}
