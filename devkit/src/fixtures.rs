/*!
Fixture builders for park and ecological-monitoring records

Shapes follow what the consoles' backends return, field names included.
*/

use serde_json::{json, Value};
use time::macros::format_description;
use time::OffsetDateTime;

/// `YYYY-MM-DD HH:MM:SS`, the backends' timestamp format
pub fn server_time(at: OffsetDateTime) -> String {
    at.format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
        .unwrap_or_default()
}

pub struct ParkRecords;

impl ParkRecords {
    /// Flow-control area
    pub fn area(id: &str, name: &str, visitors: u64, capacity: u64, threshold: f64) -> Value {
        json!({
            "area_id": id,
            "area_name": name,
            "current_visitors": visitors,
            "daily_capacity": capacity,
            "warning_threshold": threshold,
            "status": "open",
        })
    }

    /// Five areas as seen on the dashboard, 2030 visitors in total
    pub fn five_areas() -> Vec<Value> {
        vec![
            Self::area("A001", "East Gate", 300, 800, 0.8),
            Self::area("A002", "Lake Shore", 640, 800, 0.8),
            Self::area("A003", "Bamboo Forest", 430, 600, 0.7),
            Self::area("A004", "Summit", 500, 500, 0.8),
            Self::area("A005", "Visitor Centre", 160, 1000, 0.8),
        ]
    }

    pub fn log(id: u64, level: &str, module: &str, message: &str, at: OffsetDateTime) -> Value {
        json!({
            "log_id": id,
            "log_type": level,
            "module": module,
            "message": message,
            "created_at": server_time(at),
        })
    }

    pub fn tourist(id: &str, name: &str, phone: &str) -> Value {
        json!({
            "tourist_id": id,
            "name": name,
            "phone": phone,
            "id_card": "110101199001011234",
        })
    }

    pub fn device(id: &str, kind: &str, status: &str) -> Value {
        json!({
            "device_id": id,
            "device_type": kind,
            "operation_status": status,
            "region_id": "R01",
        })
    }

    pub fn indicator(id: &str, name: &str, lower: f64, upper: f64) -> Value {
        json!({
            "indicator_id": id,
            "indicator_name": name,
            "standard_lower": lower.to_string(),
            "standard_upper": upper.to_string(),
        })
    }

    pub fn reading(id: &str, indicator: &str, value: f64, at: OffsetDateTime) -> Value {
        json!({
            "data_id": id,
            "indicator_id": indicator,
            "monitor_value": value,
            "collection_time": server_time(at),
            "is_abnormal": false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_server_time_format() {
        assert_eq!(server_time(datetime!(2024-05-01 08:05:09 UTC)), "2024-05-01 08:05:09");
    }

    #[test]
    fn test_five_areas_total() {
        let total: u64 = ParkRecords::five_areas()
            .iter()
            .filter_map(|a| a["current_visitors"].as_u64())
            .sum();
        assert_eq!(total, 2030);
    }
}
