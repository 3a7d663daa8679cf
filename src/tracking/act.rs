//! Anatomically-constrained tracking.
//!
//! The tissue model itself is an external collaborator; this module defines
//! the interface the tracking machinery consults, together with the policy
//! mapping tissue transitions to terminations and judging whether a
//! termination is anatomically acceptable.

use super::ftr;
use super::stats::TerminationReason;
use crate::geometry::Point3;

/// Tissue classification at a scanner-space position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tissue {
    WhiteMatter,
    CorticalGreyMatter,
    SubcorticalGreyMatter,
    CerebrospinalFluid,
    /// Outside the domain of the tissue model.
    Outside,
}

/// Defines the properties of an anatomical-constraint collaborator.
pub trait AnatomicalConstraint3: Sync {
    /// Whether a tracking attempt may start from the given position.
    fn check_seed(&self, position: &Point3<ftr>) -> bool;

    /// Whether bounded backtracking is permitted for this run.
    ///
    /// Backtracking retries a poorly terminated extension along a different
    /// candidate direction, so it cannot be combined with a propagation
    /// algorithm that only ever produces a single direction.
    fn backtrack(&self) -> bool;

    /// Classifies the tissue at the given position.
    fn classify(&self, position: &Point3<ftr>) -> Tissue;
}

/// Maps the tissue at a freshly accepted position to a termination,
/// maintaining the subcortical-grey-matter depth bookkeeping.
///
/// Returns `None` when tracking may continue. Once the tracker has entered
/// subcortical grey matter it must terminate there; re-emerging into white
/// matter is a poor termination.
pub fn structural_transition(
    tissue: Tissue,
    sgm_depth: &mut usize,
) -> Option<TerminationReason> {
    match tissue {
        Tissue::CerebrospinalFluid => Some(TerminationReason::EnterCsf),
        Tissue::CorticalGreyMatter => Some(TerminationReason::EnterCorticalGreyMatter),
        Tissue::SubcorticalGreyMatter => {
            *sgm_depth += 1;
            None
        }
        Tissue::WhiteMatter => {
            if *sgm_depth > 0 {
                Some(TerminationReason::ExitSubcorticalGreyMatter)
            } else {
                None
            }
        }
        Tissue::Outside => Some(TerminationReason::ExitImage),
    }
}

/// Whether a termination is anatomically acceptable, i.e. whether the
/// streamline may end here without triggering backtracking or rejection.
pub fn termination_is_acceptable(reason: TerminationReason) -> bool {
    matches!(
        reason,
        TerminationReason::EnterCorticalGreyMatter
            | TerminationReason::TermInSubcorticalGreyMatter
            | TerminationReason::LengthExceeded
            | TerminationReason::EnterExcludeRegion
    )
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn white_matter_lets_tracking_continue() {
        let mut sgm_depth = 0;
        assert_eq!(structural_transition(Tissue::WhiteMatter, &mut sgm_depth), None);
        assert_eq!(sgm_depth, 0);
    }

    #[test]
    fn subcortical_grey_matter_grows_the_depth_counter() {
        let mut sgm_depth = 0;
        assert_eq!(
            structural_transition(Tissue::SubcorticalGreyMatter, &mut sgm_depth),
            None
        );
        assert_eq!(
            structural_transition(Tissue::SubcorticalGreyMatter, &mut sgm_depth),
            None
        );
        assert_eq!(sgm_depth, 2);
    }

    #[test]
    fn leaving_subcortical_grey_matter_is_a_poor_termination() {
        let mut sgm_depth = 1;
        let termination = structural_transition(Tissue::WhiteMatter, &mut sgm_depth);
        assert_eq!(
            termination,
            Some(TerminationReason::ExitSubcorticalGreyMatter)
        );
        assert!(!termination_is_acceptable(termination.unwrap()));
    }

    #[test]
    fn cortical_grey_matter_terminates_acceptably() {
        let mut sgm_depth = 0;
        let termination = structural_transition(Tissue::CorticalGreyMatter, &mut sgm_depth);
        assert_eq!(
            termination,
            Some(TerminationReason::EnterCorticalGreyMatter)
        );
        assert!(termination_is_acceptable(termination.unwrap()));
    }

    #[test]
    fn csf_terminates_poorly() {
        let mut sgm_depth = 0;
        let termination = structural_transition(Tissue::CerebrospinalFluid, &mut sgm_depth);
        assert_eq!(termination, Some(TerminationReason::EnterCsf));
        assert!(!termination_is_acceptable(termination.unwrap()));
    }
}
