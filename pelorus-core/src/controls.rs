//! Tunable control tracking
//!
//! Every adjustable radar setting (gain, sea clutter, range, ...) is held in a
//! [`ControlItem`]: the last value confirmed by a decoded report, the value the
//! operator asked for, and a generation counter so a single polling consumer
//! can pick up changes without ever missing the newest one. A change is a
//! versioned snapshot, not a queue entry; intermediate values between two polls
//! are deliberately collapsed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The set of controls a radar may expose. Not every vendor supports every
/// control; absent ones simply never appear in the [`Controls`] container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlType {
    Status,
    Range,
    Gain,
    Sea,
    Rain,
    Ftc,
    ColorGain,
    Mode,
    BearingAlignment,
    AntennaHeight,
    InterferenceRejection,
    LocalInterferenceRejection,
    TargetExpansion,
    TargetBoost,
    TargetSeparation,
    NoiseRejection,
    ScanSpeed,
    SideLobeSuppression,
    SeaState,
    MainBangSuppression,
    DisplayTiming,
    Tune,
    DopplerMode,
    NoTransmitStart,
    NoTransmitEnd,
}

/// Snapshot of one control handed to the polling consumer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlValue {
    pub value: i32,
    pub auto: bool,
}

/// One tunable value, with separate hardware-confirmed and requested sides.
///
/// `value`/`auto` are written only from decoded reports. `desired` is what the
/// operator last asked for and is what a UI should display while the command
/// is in flight. `generation` increments on every observed hardware change;
/// `consumed` trails it and is advanced only by [`take_update`], so reading a
/// pending change is single-consumer by construction.
///
/// [`take_update`]: ControlItem::take_update
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlItem {
    value: i32,
    auto: bool,
    desired: i32,
    generation: u64,
    #[serde(skip)]
    consumed: u64,
}

impl ControlItem {
    pub fn new(value: i32) -> Self {
        Self {
            value,
            auto: false,
            desired: value,
            generation: 0,
            consumed: 0,
        }
    }

    /// Last value confirmed by the hardware.
    pub fn value(&self) -> i32 {
        self.value
    }

    /// Whether the hardware reports this control in automatic mode.
    pub fn is_auto(&self) -> bool {
        self.auto
    }

    /// The value the operator last requested (falls back to the confirmed
    /// value when nothing was requested).
    pub fn desired(&self) -> i32 {
        self.desired
    }

    /// Record a value decoded from a status report. Returns true and bumps the
    /// generation when anything actually changed.
    pub fn update(&mut self, value: i32, auto: bool) -> bool {
        if self.value == value && self.auto == auto {
            return false;
        }
        self.value = value;
        self.auto = auto;
        self.generation += 1;
        true
    }

    /// Record an operator request. Does not touch the confirmed value; the
    /// next status report will confirm (or contradict) it.
    pub fn set_desired(&mut self, value: i32) {
        self.desired = value;
    }

    /// Hand the newest confirmed value to the polling consumer, at most once
    /// per change. Returns `None` when nothing changed since the last call.
    pub fn take_update(&mut self) -> Option<ControlValue> {
        if self.generation == self.consumed {
            return None;
        }
        self.consumed = self.generation;
        Some(ControlValue {
            value: self.value,
            auto: self.auto,
        })
    }

    /// Whether a change is pending for the consumer without consuming it.
    pub fn has_update(&self) -> bool {
        self.generation != self.consumed
    }
}

/// All controls of one radar, keyed by type.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Controls {
    items: HashMap<ControlType, ControlItem>,
}

impl Controls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, control: ControlType) -> Option<&ControlItem> {
        self.items.get(&control)
    }

    pub fn get_mut(&mut self, control: ControlType) -> Option<&mut ControlItem> {
        self.items.get_mut(&control)
    }

    /// Update from a decoded report, creating the control on first sight.
    /// Returns true when the stored value changed.
    pub fn update(&mut self, control: ControlType, value: i32, auto: bool) -> bool {
        match self.items.get_mut(&control) {
            Some(item) => item.update(value, auto),
            None => {
                // First sighting counts as a change so the consumer sees it.
                self.items.insert(
                    control,
                    ControlItem {
                        value,
                        auto,
                        desired: value,
                        generation: 1,
                        consumed: 0,
                    },
                );
                true
            }
        }
    }

    pub fn set_desired(&mut self, control: ControlType, value: i32) {
        self.items
            .entry(control)
            .or_insert_with(|| ControlItem::new(value))
            .set_desired(value);
    }

    pub fn take_update(&mut self, control: ControlType) -> Option<ControlValue> {
        self.items.get_mut(&control)?.take_update()
    }

    /// Drain every pending change, for consumers that poll the whole set.
    pub fn take_updates(&mut self) -> Vec<(ControlType, ControlValue)> {
        let mut out = Vec::new();
        for (control, item) in self.items.iter_mut() {
            if let Some(cv) = item.take_update() {
                out.push((*control, cv));
            }
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ControlType, &ControlItem)> {
        self.items.iter()
    }

    /// Current values in the shape the driver's status endpoint serves.
    pub fn to_json_map(&self) -> HashMap<String, serde_json::Value> {
        self.items
            .iter()
            .map(|(control, item)| {
                let key = serde_json::to_value(control)
                    .ok()
                    .and_then(|v| v.as_str().map(|s| s.to_string()))
                    .unwrap_or_default();
                let value = serde_json::json!({
                    "mode": if item.is_auto() { "auto" } else { "manual" },
                    "value": item.value(),
                });
                (key, value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_update_is_single_consumer() {
        let mut item = ControlItem::new(0);

        assert!(item.update(40, false));
        assert_eq!(
            item.take_update(),
            Some(ControlValue {
                value: 40,
                auto: false
            })
        );
        // Second poll sees nothing until the hardware reports again
        assert_eq!(item.take_update(), None);

        // Identical report is not a change
        assert!(!item.update(40, false));
        assert_eq!(item.take_update(), None);

        // Auto flag alone is a change
        assert!(item.update(40, true));
        assert!(item.has_update());
        assert_eq!(
            item.take_update(),
            Some(ControlValue {
                value: 40,
                auto: true
            })
        );
    }

    #[test]
    fn test_collapses_to_newest_value() {
        let mut item = ControlItem::new(0);
        item.update(10, false);
        item.update(20, false);
        item.update(30, false);

        // Only the newest value survives; intermediates are gone
        assert_eq!(item.take_update().unwrap().value, 30);
        assert_eq!(item.take_update(), None);
    }

    #[test]
    fn test_desired_does_not_clobber_confirmed() {
        let mut item = ControlItem::new(50);
        item.set_desired(80);
        assert_eq!(item.desired(), 80);
        assert_eq!(item.value(), 50);
        // A request alone is not a hardware change
        assert_eq!(item.take_update(), None);

        // Hardware confirms
        item.update(80, false);
        assert_eq!(item.take_update().unwrap().value, 80);
    }

    #[test]
    fn test_first_report_is_visible() {
        let mut controls = Controls::new();
        assert!(controls.update(ControlType::Gain, 55, false));
        assert_eq!(
            controls.take_update(ControlType::Gain),
            Some(ControlValue {
                value: 55,
                auto: false
            })
        );
        assert_eq!(controls.take_update(ControlType::Gain), None);
    }

    #[test]
    fn test_to_json_map() {
        let mut controls = Controls::new();
        controls.update(ControlType::Gain, 60, true);
        controls.update(ControlType::Sea, 25, false);

        let map = controls.to_json_map();
        assert_eq!(map["gain"]["mode"], "auto");
        assert_eq!(map["gain"]["value"], 60);
        assert_eq!(map["sea"]["mode"], "manual");
        assert_eq!(map["sea"]["value"], 25);
    }

    #[test]
    #[cfg(feature = "navico")]
    fn test_auto_gain_report_scaling() {
        // A status report carrying auto-gain with raw value 200 of 255
        // lands in the control set as auto mode at 78 percent.
        use crate::protocol::navico::raw_to_percent;

        let mut controls = Controls::new();
        controls.update(ControlType::Gain, raw_to_percent(200) as i32, true);

        let item = controls.get(ControlType::Gain).unwrap();
        assert!(item.is_auto());
        assert_eq!(item.value(), 78);
    }
}
