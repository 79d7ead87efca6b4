//! What happens when a tag is read at the tube entrance: unknown tags are
//! turned away, known animals are checked against their daily cap, and
//! admitted animals get a session.

use crate::command::ActuatorCommand;
use crate::config::RigConfig;
use crate::error::RigError;
use crate::profile::{self, find_by_id, AnimalProfile};
use crate::serial_link::Port;
use crate::session::{SessionController, SessionOutcome};
use crate::trial_limits::{Admission, TrialLimits};

use chrono::NaiveDateTime;
use log::{error, info, warn};
use std::{path::PathBuf, time::Duration};

/// How a tag was dealt with.
#[derive(Debug)]
pub enum TagOutcome {
    /// Nobody has this tag; the session was rejected with `Y`.
    Rejected,
    /// The animal has used up today's sessions.
    LimitReached {
        /// The cap that was hit.
        limit: u32,
    },
    /// A session ran to completion.
    Ran(SessionOutcome),
    /// The session was admitted but did not complete.
    Failed(RigError),
}

/// The profiles and daily caps the rig admits animals against. Both are
/// reloaded around every session so edits on disk are picked up.
pub struct Admissions {
    profiles_dir: PathBuf,
    limits_path: PathBuf,
    settle: Duration,
    profiles: Vec<AnimalProfile>,
    limits: TrialLimits,
}

impl Admissions {
    /// Load the profiles under `profiles_dir`. `settle` is slept between the
    /// start byte and the session.
    pub fn new(
        profiles_dir: impl Into<PathBuf>,
        limits_path: impl Into<PathBuf>,
        limits: TrialLimits,
        settle: Duration,
    ) -> Result<Self, RigError> {
        let profiles_dir = profiles_dir.into();
        let profiles = profile::load_all(&profiles_dir)?;
        info!("Loaded {} animal profiles", profiles.len());
        Ok(Self {
            profiles_dir,
            limits_path: limits_path.into(),
            settle,
            profiles,
            limits,
        })
    }

    /// Everything from the rig config.
    pub fn from_config(config: &RigConfig) -> Result<Self, RigError> {
        let limits = TrialLimits::load(&config.trial_limits, config.daily_reset_hour)?;
        Self::new(
            &config.profiles_dir,
            &config.trial_limits,
            limits,
            config.timings.settle(),
        )
    }

    /// The profiles as of the last reload.
    pub fn profiles(&self) -> &[AnimalProfile] {
        &self.profiles
    }

    /// The current caps and counts.
    pub fn limits(&self) -> &TrialLimits {
        &self.limits
    }

    /// Deal with one tag read at `now`. Only actuator link failures are
    /// errors; a failed session is reported in the outcome.
    pub fn handle_tag<P: Port>(
        &mut self,
        tag: &str,
        now: NaiveDateTime,
        controller: &mut SessionController<P>,
    ) -> Result<TagOutcome, RigError> {
        if find_by_id(&self.profiles, tag).is_none() {
            controller
                .link_mut()
                .send(ActuatorCommand::RejectSession)?;
            info!("{} not recognized. Aborting session.", tag);
            return Ok(TagOutcome::Rejected);
        }

        self.limits.rollover(now);
        self.reload_profiles();
        let Some(mut animal) = find_by_id(&self.profiles, tag).cloned() else {
            warn!("{} disappeared from the profiles, skipping", tag);
            return Ok(TagOutcome::Rejected);
        };

        if let Admission::LimitReached { limit } = self.limits.admit(animal.slot()) {
            info!(
                "{} has reached its maximum of {} sessions for today...aborting!",
                animal.name, limit
            );
            return Ok(TagOutcome::LimitReached { limit });
        }

        let link = controller.link_mut();
        link.flush_input()?;
        link.send(ActuatorCommand::StartSession)?;
        // Give the animal time to get into the tube.
        spin_sleep::sleep(self.settle);

        let outcome = match controller.run(&mut animal) {
            Ok(outcome) => {
                info!(
                    "{}: {} trials, {} successful, ended by {:?}, video {:?}",
                    animal.name,
                    outcome.trials,
                    outcome.successes,
                    outcome.termination,
                    outcome.video
                );
                TagOutcome::Ran(outcome)
            }
            Err(e) => {
                error!("Session for {} failed: {}", animal.name, e);
                TagOutcome::Failed(e)
            }
        };
        controller.link_mut().flush_output()?;

        self.reload_profiles();
        if let Err(e) = self.limits.reload(&self.limits_path) {
            warn!("Keeping the previous trial limits: {}", e);
        }
        Ok(outcome)
    }

    fn reload_profiles(&mut self) {
        match profile::load_all(&self.profiles_dir) {
            Ok(profiles) => self.profiles = profiles,
            Err(e) => warn!("Keeping the previous animal profiles: {}", e),
        }
    }
}
