//! The fill engine.
//!
//! A [`ReportFiller`] walks a report design band by band and produces pages.
//! Each element of a band goes through the element state machine, which
//! decides per pass whether it prints, is suppressed or overflows to the
//! next page. Subreport elements start a nested filler under a
//! [`SubreportParent`] coordinator and receive its pages one at a time.
//! Text fields with a delayed evaluation time print empty and are filled
//! in once their page, group or report is complete.

mod band;
mod delayed;
mod element;
mod filler;
mod parent;
mod shared;
mod variable;

pub use element::{ElementState, PrepareOutcome};
pub use filler::{PrintDocument, ReportFiller};
pub use parent::{FillerParent, PageCompletedEvent, SubreportParent};
pub use shared::FillerShared;
