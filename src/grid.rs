//! Mapping between clock times and slot indices within the working window.

use chrono::{NaiveTime, Timelike};

use crate::engine::EngineError;
use crate::limits::MAX_SLOTS_PER_DAY;
use crate::model::SlotRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridConfig {
    pub work_start: NaiveTime,
    pub work_end: NaiveTime,
    pub slot_minutes: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            work_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            work_end: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN),
            slot_minutes: 30,
        }
    }
}

/// Validated working window. Pure; holds no schedule state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeGrid {
    start_minute: u32,
    end_minute: u32,
    slot_minutes: u32,
    slot_count: usize,
}

impl TimeGrid {
    pub fn new(config: &GridConfig) -> Result<Self, EngineError> {
        if config.work_start.second() != 0 || config.work_end.second() != 0 {
            return Err(EngineError::InvalidConfig(
                "working window must start and end on whole minutes".into(),
            ));
        }
        let start_minute = minute_of_day(config.work_start);
        let end_minute = minute_of_day(config.work_end);
        if end_minute <= start_minute {
            return Err(EngineError::InvalidConfig(format!(
                "working window {}-{} is empty",
                format_clock(config.work_start),
                format_clock(config.work_end)
            )));
        }
        if config.slot_minutes == 0 {
            return Err(EngineError::InvalidConfig("slot length must be positive".into()));
        }
        let span = end_minute - start_minute;
        if span % config.slot_minutes != 0 {
            return Err(EngineError::InvalidConfig(format!(
                "working window of {span} minutes is not a multiple of {}-minute slots",
                config.slot_minutes
            )));
        }
        let slot_count = (span / config.slot_minutes) as usize;
        if slot_count > MAX_SLOTS_PER_DAY {
            return Err(EngineError::InvalidConfig(format!(
                "{slot_count} slots per day exceeds the limit of {MAX_SLOTS_PER_DAY}"
            )));
        }
        Ok(Self {
            start_minute,
            end_minute,
            slot_minutes: config.slot_minutes,
            slot_count,
        })
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn slot_minutes(&self) -> u32 {
        self.slot_minutes
    }

    /// Index of the slot boundary at `time`. `work_end` maps to `slot_count`.
    pub fn to_slot_index(&self, time: NaiveTime) -> Result<usize, EngineError> {
        if time.second() != 0 || time.nanosecond() != 0 {
            return Err(EngineError::InvalidRange("time has sub-minute precision"));
        }
        let minute = minute_of_day(time);
        if minute < self.start_minute || minute > self.end_minute {
            return Err(EngineError::InvalidRange("time outside working window"));
        }
        let offset = minute - self.start_minute;
        if offset % self.slot_minutes != 0 {
            return Err(EngineError::InvalidRange("time not aligned to slot length"));
        }
        Ok((offset / self.slot_minutes) as usize)
    }

    pub fn from_slot_index(&self, index: usize) -> Result<NaiveTime, EngineError> {
        if index > self.slot_count {
            return Err(EngineError::InvalidRange("slot index outside working window"));
        }
        let minute = self.start_minute + index as u32 * self.slot_minutes;
        NaiveTime::from_hms_opt(minute / 60, minute % 60, 0)
            .ok_or(EngineError::InvalidRange("slot index outside working window"))
    }

    pub fn range(&self, start: NaiveTime, end: NaiveTime) -> Result<SlotRange, EngineError> {
        let range = SlotRange::new(self.to_slot_index(start)?, self.to_slot_index(end)?);
        if range.is_empty() {
            return Err(EngineError::InvalidRange("end must be after start"));
        }
        Ok(range)
    }

    /// Parse `HH:MM` clock strings and map them onto the grid.
    pub fn parse_range(&self, start: &str, end: &str) -> Result<SlotRange, EngineError> {
        self.range(parse_clock(start)?, parse_clock(end)?)
    }

    pub fn clock_label(&self, index: usize) -> String {
        self.from_slot_index(index)
            .map(format_clock)
            .unwrap_or_else(|_| "??:??".to_string())
    }
}

fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

pub fn parse_clock(s: &str) -> Result<NaiveTime, EngineError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| EngineError::InvalidRange("expected HH:MM clock time"))
}

pub fn format_clock(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}
