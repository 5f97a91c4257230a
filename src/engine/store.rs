use std::collections::{BTreeMap, HashMap};

use crate::model::*;

use super::EngineError;

/// One company's slots for one day. Length never changes after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySchedule {
    slots: Vec<SlotStatus>,
}

impl DaySchedule {
    pub fn new(slot_count: usize) -> Self {
        Self {
            slots: vec![SlotStatus::Free; slot_count],
        }
    }

    pub fn from_slots(slots: Vec<SlotStatus>) -> Self {
        Self { slots }
    }

    pub fn slots(&self) -> &[SlotStatus] {
        &self.slots
    }

    pub fn read(&self, range: SlotRange) -> Result<&[SlotStatus], EngineError> {
        check_bounds(range, self.slots.len())?;
        Ok(&self.slots[range.start..range.end])
    }

    /// All-or-nothing compare-and-set over `range`.
    ///
    /// Every cell must currently be one of `expected`; otherwise nothing is written and the
    /// offending indices are returned in `Conflict`.
    pub fn cas(
        &mut self,
        range: SlotRange,
        expected: &[SlotStatus],
        new: SlotStatus,
    ) -> Result<(), EngineError> {
        check_bounds(range, self.slots.len())?;
        let conflicts: Vec<usize> = range
            .indices()
            .filter(|&i| !expected.contains(&self.slots[i]))
            .collect();
        if !conflicts.is_empty() {
            return Err(EngineError::Conflict(conflicts));
        }
        for cell in &mut self.slots[range.start..range.end] {
            *cell = new;
        }
        Ok(())
    }
}

pub(crate) fn check_bounds(range: SlotRange, slot_count: usize) -> Result<(), EngineError> {
    if range.start >= range.end || range.end > slot_count {
        return Err(EngineError::RangeOutOfBounds {
            start: range.start,
            end: range.end,
            slot_count,
        });
    }
    Ok(())
}

/// Slot grids keyed by (company, date). Days are created lazily, all `Free`.
#[derive(Debug, Clone)]
pub struct ScheduleStore {
    slot_count: usize,
    days: HashMap<CompanyId, BTreeMap<DateKey, DaySchedule>>,
}

impl ScheduleStore {
    pub fn new(slot_count: usize) -> Self {
        Self {
            slot_count,
            days: HashMap::new(),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn ensure(&mut self, company_id: &CompanyId, date: DateKey) -> &mut DaySchedule {
        let slot_count = self.slot_count;
        self.days
            .entry(company_id.clone())
            .or_default()
            .entry(date)
            .or_insert_with(|| DaySchedule::new(slot_count))
    }

    pub fn get(&self, company_id: &CompanyId, date: DateKey) -> Option<&DaySchedule> {
        self.days.get(company_id).and_then(|d| d.get(&date))
    }

    pub fn contains(&self, company_id: &CompanyId, date: DateKey) -> bool {
        self.get(company_id, date).is_some()
    }

    /// Statuses in `range`. A day that was never touched reads as all `Free`.
    pub fn read_range(
        &self,
        company_id: &CompanyId,
        date: DateKey,
        range: SlotRange,
    ) -> Result<Vec<SlotStatus>, EngineError> {
        check_bounds(range, self.slot_count)?;
        Ok(match self.get(company_id, date) {
            Some(day) => day.read(range)?.to_vec(),
            None => vec![SlotStatus::Free; range.len()],
        })
    }

    /// Whole-day statuses, `Free` for untouched days.
    pub fn statuses(&self, company_id: &CompanyId, date: DateKey) -> Vec<SlotStatus> {
        match self.get(company_id, date) {
            Some(day) => day.slots().to_vec(),
            None => vec![SlotStatus::Free; self.slot_count],
        }
    }

    pub fn cas_range(
        &mut self,
        company_id: &CompanyId,
        date: DateKey,
        range: SlotRange,
        expected: &[SlotStatus],
        new: SlotStatus,
    ) -> Result<(), EngineError> {
        check_bounds(range, self.slot_count)?;
        self.ensure(company_id, date).cas(range, expected, new)
    }

    /// Restore path only. Caller guarantees the length matches the grid.
    pub fn insert_day(&mut self, company_id: CompanyId, date: DateKey, day: DaySchedule) {
        self.days.entry(company_id).or_default().insert(date, day);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CompanyId, DateKey, &DaySchedule)> {
        self.days
            .iter()
            .flat_map(|(company, days)| days.iter().map(move |(date, day)| (company, *date, day)))
    }

    pub fn day_count(&self) -> usize {
        self.days.values().map(|d| d.len()).sum()
    }
}
