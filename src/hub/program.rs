//! Programs (spec §4.8), grounded on `platforms/hub/button.py` and
//! `platforms/hub/__init__.py::_update_program_entities`.

use crate::model::entity::unique_identifier;

/// One fetched program, as reported by `Program.getAll`.
#[derive(Clone, Debug)]
pub struct ProgramData {
    pub pid: String,
    pub name: String,
    pub is_active: bool,
    pub is_internal: bool,
    pub last_execute_time: Option<String>,
}

/// Execute-only hub entity: pressing it fires `Program.execute` with its
/// id (spec §4.8); it holds no readable value beyond bookkeeping fields.
#[derive(Debug)]
pub struct ProgramButton {
    pub pid: String,
    pub name: String,
    pub is_active: bool,
    pub is_internal: bool,
    pub last_execute_time: Option<String>,
    pub unique_identifier: String,
}

impl ProgramButton {
    pub fn new(central_name: &str, data: &ProgramData) -> Self {
        Self {
            pid: data.pid.clone(),
            name: data.name.clone(),
            is_active: data.is_active,
            is_internal: data.is_internal,
            last_execute_time: data.last_execute_time.clone(),
            unique_identifier: unique_identifier(central_name, "hub", &data.pid),
        }
    }

    /// `update_data` (spec §4.8): an existing program button updates its
    /// bookkeeping fields in place when re-fetched.
    pub fn update_data(&mut self, data: &ProgramData) {
        self.is_active = data.is_active;
        self.is_internal = data.is_internal;
        self.last_execute_time = data.last_execute_time.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> ProgramData {
        ProgramData {
            pid: "1406".into(),
            name: "Evening lights".into(),
            is_active: true,
            is_internal: false,
            last_execute_time: None,
        }
    }

    #[test]
    fn update_data_refreshes_bookkeeping_fields() {
        let mut button = ProgramButton::new("ccu", &data());
        let mut refreshed = data();
        refreshed.is_active = false;
        refreshed.last_execute_time = Some("2026-07-28T10:00:00".into());
        button.update_data(&refreshed);
        assert!(!button.is_active);
        assert_eq!(button.last_execute_time.as_deref(), Some("2026-07-28T10:00:00"));
    }

    #[test]
    fn unique_identifier_is_stable_for_same_pid() {
        let a = ProgramButton::new("ccu", &data());
        let b = ProgramButton::new("ccu", &data());
        assert_eq!(a.unique_identifier, b.unique_identifier);
    }
}
