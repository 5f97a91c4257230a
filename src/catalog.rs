//! Service catalog consumed by the request workflow. The engine treats it as opaque.

use crate::model::{Answers, Price};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    /// Length of the visit in grid slots.
    pub duration_slots: usize,
}

pub trait ServiceCatalog: Send + Sync {
    fn service(&self, service_id: &str) -> Option<ServiceInfo>;

    /// `None` means the service needs a quotation.
    fn price(&self, service_id: &str, answers: &Answers) -> Option<Price>;
}

/// Plumbing catalog used by the stock binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct DemoCatalog;

impl ServiceCatalog for DemoCatalog {
    fn service(&self, service_id: &str) -> Option<ServiceInfo> {
        let (name, duration_slots) = match service_id {
            "S1" => ("Blockage / Verstopping", 2),
            "S2" => ("Bathroom Renovation (Quotation)", 4),
            _ => return None,
        };
        Some(ServiceInfo {
            id: service_id.to_string(),
            name: name.to_string(),
            duration_slots,
        })
    }

    fn price(&self, service_id: &str, answers: &Answers) -> Option<Price> {
        match service_id {
            "S1" => {
                let mut euros = 95;
                if answer_str(answers, "severity") == Some("Fully blocked") {
                    euros += 40;
                }
                if answer_str(answers, "location") == Some("Toilet") {
                    euros += 20;
                }
                if answers.get("afterHours").and_then(|v| v.as_bool()) == Some(true) {
                    euros += 60;
                }
                Some(Price::from_euros(euros))
            }
            _ => None,
        }
    }
}

fn answer_str<'a>(answers: &'a Answers, key: &str) -> Option<&'a str> {
    answers.get(key).and_then(|v| v.as_str())
}
