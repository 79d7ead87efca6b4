//! Daily per-animal session caps.
//!
//! The limit file holds one integer per line, the cap for mouse slots 1 to 5
//! in order. Counts of sessions run today live next to the caps and are reset
//! by [`TrialLimits::rollover`] once per day at the configured hour.

use crate::error::RigError;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use log::info;
use nom::{
    character::complete::{line_ending, space0, u32},
    combinator::{all_consuming, opt},
    multi::{count, many0},
    sequence::{delimited, terminated},
    Finish, IResult,
};
use std::{collections::BTreeMap, fs, path::Path};

/// Number of mouse slots in a cage.
pub const SLOTS: usize = 5;

/// The cap and today's count for one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLimit {
    /// Sessions allowed per day.
    pub limit: u32,
    /// Sessions started today.
    pub today: u32,
}

/// What happened when an animal asked for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The session may run, and has been counted.
    Admitted,
    /// The animal has used up today's sessions.
    LimitReached {
        /// The cap that was hit.
        limit: u32,
    },
    /// The animal is not in a limited slot.
    Unlimited,
}

/// Caps and counts for every slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialLimits {
    slots: BTreeMap<u8, SlotLimit>,
    reset_hour: u32,
    last_reset: Option<NaiveDate>,
}

fn limit_line(s: &str) -> IResult<&str, u32> {
    terminated(delimited(space0, u32, space0), opt(line_ending))(s)
}

fn parse_limits(s: &str) -> IResult<&str, Vec<u32>> {
    terminated(count(limit_line, SLOTS), many0(line_ending))(s)
}

impl TrialLimits {
    /// Parse the five caps from the text of a limit file.
    pub fn parse(text: &str, reset_hour: u32) -> Result<Self, RigError> {
        let (_, limits) = all_consuming(parse_limits)(text)
            .finish()
            .map_err(|e| RigError::MalformedLimits(format!("{:?} at {:?}", e.code, e.input)))?;

        let slots = limits
            .into_iter()
            .enumerate()
            .map(|(i, limit)| (i as u8 + 1, SlotLimit { limit, today: 0 }))
            .collect();

        Ok(Self {
            slots,
            reset_hour,
            last_reset: None,
        })
    }

    /// Read the limit file at `path`.
    pub fn load(path: impl AsRef<Path>, reset_hour: u32) -> Result<Self, RigError> {
        Self::parse(&fs::read_to_string(path)?, reset_hour)
    }

    /// Take new caps from `path`, keeping today's counts.
    pub fn reload(&mut self, path: impl AsRef<Path>) -> Result<(), RigError> {
        let fresh = Self::load(path, self.reset_hour)?;
        for (slot, limit) in fresh.slots {
            self.slots
                .entry(slot)
                .and_modify(|s| s.limit = limit.limit)
                .or_insert(limit);
        }
        Ok(())
    }

    /// Zero every count the first time this is called on or after the reset
    /// hour of a new day. Returns whether a reset happened.
    pub fn rollover(&mut self, now: NaiveDateTime) -> bool {
        let today = now.date();
        if now.hour() < self.reset_hour || self.last_reset == Some(today) {
            return false;
        }
        info!("Resetting animal trial limits for the day!");
        for slot in self.slots.values_mut() {
            slot.today = 0;
        }
        self.last_reset = Some(today);
        true
    }

    /// Check the cap for `slot` and count the session if it is allowed.
    pub fn admit(&mut self, slot: Option<u8>) -> Admission {
        match slot.and_then(|s| self.slots.get_mut(&s)) {
            None => Admission::Unlimited,
            Some(s) if s.today >= s.limit => Admission::LimitReached { limit: s.limit },
            Some(s) => {
                s.today += 1;
                Admission::Admitted
            }
        }
    }

    /// The cap and count for `slot`.
    pub fn get(&self, slot: u8) -> Option<SlotLimit> {
        self.slots.get(&slot).copied()
    }
}
