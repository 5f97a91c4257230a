use std::collections::BTreeMap;

use crate::model::*;

// ── Free-window search ────────────────────────────────────────────

/// Every fixed-width window `[i, i + duration)` that is entirely `Free` for at least one
/// company, deduplicated by range and ordered by start.
///
/// `days` yields companies in configured order; `None` stands for a day that was never
/// created and is therefore all `Free`. Each window lists its companies in that same order.
pub fn free_windows<'a, I>(days: I, slot_count: usize, duration: usize) -> Vec<FreeWindow>
where
    I: IntoIterator<Item = (&'a CompanyId, Option<&'a [SlotStatus]>)>,
{
    if duration == 0 || duration > slot_count {
        return Vec::new();
    }

    let mut by_start: BTreeMap<usize, FreeWindow> = BTreeMap::new();
    for (company, slots) in days {
        for start in window_starts(slots, slot_count, duration) {
            by_start
                .entry(start)
                .or_insert_with(|| FreeWindow {
                    range: SlotRange::new(start, start + duration),
                    companies: Vec::new(),
                })
                .companies
                .push(company.clone());
        }
    }
    by_start.into_values().collect()
}

/// Start indices of all-free windows of `duration` cells, via a running count of free cells.
fn window_starts(slots: Option<&[SlotStatus]>, slot_count: usize, duration: usize) -> Vec<usize> {
    let Some(slots) = slots else {
        return (0..=slot_count - duration).collect();
    };
    let mut starts = Vec::new();
    let mut run = 0usize;
    for (i, status) in slots.iter().enumerate() {
        if *status == SlotStatus::Free {
            run += 1;
        } else {
            run = 0;
        }
        if run >= duration {
            starts.push(i + 1 - duration);
        }
    }
    starts
}

/// Maximal runs of contiguous `Free` cells.
pub fn free_runs(slots: &[SlotStatus]) -> Vec<SlotRange> {
    let mut runs = Vec::new();
    let mut run_start: Option<usize> = None;
    for (i, status) in slots.iter().enumerate() {
        match (status, run_start) {
            (SlotStatus::Free, None) => run_start = Some(i),
            (SlotStatus::Free, Some(_)) => {}
            (_, Some(start)) => {
                runs.push(SlotRange::new(start, i));
                run_start = None;
            }
            (_, None) => {}
        }
    }
    if let Some(start) = run_start {
        runs.push(SlotRange::new(start, slots.len()));
    }
    runs
}

/// True if every cell of `range` is `Free`. Out-of-bounds ranges never fit.
pub fn fits(slots: &[SlotStatus], range: SlotRange) -> bool {
    range.start < range.end
        && range.end <= slots.len()
        && slots[range.start..range.end]
            .iter()
            .all(|s| *s == SlotStatus::Free)
}
