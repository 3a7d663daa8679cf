//! Shared bookkeeping of why tracking attempts ended.
//!
//! Both reason sets are closed enumerations backed by fixed-size arrays of
//! lock-free counters, so arbitrarily many workers can record outcomes
//! without coordination. Individual counts are only meaningful once all
//! workers have joined.

use atomic_counter::{AtomicCounter, RelaxedCounter};
use std::fmt;

/// Reason for which an in-progress streamline stopped growing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminationReason {
    /// The tracker left the valid domain of the orientation field.
    ExitImage = 0,
    /// The tracker left the tracking mask.
    ExitMask = 1,
    /// The tracker entered an exclusion region.
    EnterExcludeRegion = 2,
    /// The field amplitude dropped below the tracking cutoff.
    Model = 3,
    /// The turn between consecutive steps exceeded the angular limit.
    HighCurvature = 4,
    /// The streamline reached the maximum permitted length.
    LengthExceeded = 5,
    /// The rejection-sampling envelope was degenerate or non-finite.
    BadCalibration = 6,
    /// The tracker entered cortical grey matter.
    EnterCorticalGreyMatter = 7,
    /// The tracker entered cerebrospinal fluid.
    EnterCsf = 8,
    /// The signal faded while inside subcortical grey matter.
    TermInSubcorticalGreyMatter = 9,
    /// The tracker left subcortical grey matter after having entered it.
    ExitSubcorticalGreyMatter = 10,
}

impl TerminationReason {
    /// Creates an array for iterating over all termination reasons.
    pub fn slice() -> [Self; 11] {
        [
            Self::ExitImage,
            Self::ExitMask,
            Self::EnterExcludeRegion,
            Self::Model,
            Self::HighCurvature,
            Self::LengthExceeded,
            Self::BadCalibration,
            Self::EnterCorticalGreyMatter,
            Self::EnterCsf,
            Self::TermInSubcorticalGreyMatter,
            Self::ExitSubcorticalGreyMatter,
        ]
    }

    fn label(self) -> &'static str {
        match self {
            Self::ExitImage => "exited image",
            Self::ExitMask => "exited tracking mask",
            Self::EnterExcludeRegion => "entered exclusion region",
            Self::Model => "amplitude below cutoff",
            Self::HighCurvature => "curvature limit exceeded",
            Self::LengthExceeded => "maximum length reached",
            Self::BadCalibration => "degenerate calibration",
            Self::EnterCorticalGreyMatter => "entered cortical grey matter",
            Self::EnterCsf => "entered CSF",
            Self::TermInSubcorticalGreyMatter => "terminated in subcortical grey matter",
            Self::ExitSubcorticalGreyMatter => "exited subcortical grey matter",
        }
    }
}

/// Reason for which a generation attempt never produced a countable
/// streamline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectionReason {
    /// The seed point failed the mask, exclusion or anatomical seed tests.
    InvalidSeed = 0,
    /// No initial direction with sufficient amplitude was found at the seed.
    NoPropagationFromSeed = 1,
    /// The finished track was shorter than the minimum length.
    TrackTooShort = 2,
    /// The track entered an exclusion region.
    EnteredExcludeRegion = 3,
    /// The track failed to traverse every inclusion region.
    MissedIncludeRegion = 4,
    /// Anatomical constraints judged the termination unacceptable.
    PoorTermination = 5,
}

impl RejectionReason {
    /// Creates an array for iterating over all rejection reasons.
    pub fn slice() -> [Self; 6] {
        [
            Self::InvalidSeed,
            Self::NoPropagationFromSeed,
            Self::TrackTooShort,
            Self::EnteredExcludeRegion,
            Self::MissedIncludeRegion,
            Self::PoorTermination,
        ]
    }

    fn label(self) -> &'static str {
        match self {
            Self::InvalidSeed => "invalid seed",
            Self::NoPropagationFromSeed => "no propagation from seed",
            Self::TrackTooShort => "track too short",
            Self::EnteredExcludeRegion => "entered exclusion region",
            Self::MissedIncludeRegion => "missed inclusion region",
            Self::PoorTermination => "poor anatomical termination",
        }
    }
}

/// Lock-free per-reason counters shared by all workers of a run.
pub struct TrackingStats {
    terminations: [RelaxedCounter; 11],
    rejections: [RelaxedCounter; 6],
}

impl TrackingStats {
    /// Creates a new set of zeroed counters.
    pub fn new() -> Self {
        Self {
            terminations: std::array::from_fn(|_| RelaxedCounter::new(0)),
            rejections: std::array::from_fn(|_| RelaxedCounter::new(0)),
        }
    }

    /// Records a termination. Never blocks and never panics.
    pub fn add_termination(&self, reason: TerminationReason) {
        self.terminations[reason as usize].inc();
    }

    /// Records a rejection. Never blocks and never panics.
    pub fn add_rejection(&self, reason: RejectionReason) {
        self.rejections[reason as usize].inc();
    }

    /// Returns the number of recorded terminations for the given reason.
    pub fn termination_count(&self, reason: TerminationReason) -> usize {
        self.terminations[reason as usize].get()
    }

    /// Returns the number of recorded rejections for the given reason.
    pub fn rejection_count(&self, reason: RejectionReason) -> usize {
        self.rejections[reason as usize].get()
    }

    /// Returns the total number of recorded terminations.
    pub fn total_terminations(&self) -> usize {
        TerminationReason::slice()
            .iter()
            .map(|&reason| self.termination_count(reason))
            .sum()
    }

    /// Returns the total number of recorded rejections.
    pub fn total_rejections(&self) -> usize {
        RejectionReason::slice()
            .iter()
            .map(|&reason| self.rejection_count(reason))
            .sum()
    }
}

impl Default for TrackingStats {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Terminations:")?;
        for reason in TerminationReason::slice() {
            let count = self.termination_count(reason);
            if count > 0 {
                writeln!(f, "  {:<40}{}", reason.label(), count)?;
            }
        }
        writeln!(f, "Rejections:")?;
        for reason in RejectionReason::slice() {
            let count = self.rejection_count(reason);
            if count > 0 {
                writeln!(f, "  {:<40}{}", reason.label(), count)?;
            }
        }
        Ok(())
    }
}
