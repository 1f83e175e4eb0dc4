use pagefill_core::FillResult;

use super::element::{BandPosition, ElementContext, ElementFill, PrepareOutcome, Staged};
use crate::context::FillContext;
use crate::design::{BandDesign, BandKind, SplitType, VariableDesign};
use crate::expr::Evaluation;
use crate::logging::targets;
use crate::print::PrintElement;

/// Elements produced by one band pass, positioned relative to the band.
#[derive(Debug, Default)]
pub(crate) struct BandOutput {
    pub elements: Vec<PrintElement>,
    /// Height the band occupies on the page.
    pub stretch: u32,
    /// Some element has content left for the next page.
    pub will_overflow: bool,
    /// An element left pending by the previous pass printed.
    pub progressed: bool,
    /// Bookmarks and delayed values to commit when the band is placed.
    pub staged: Staged,
}

/// Fill state of one band.
#[derive(Debug)]
pub(crate) struct BandFill {
    design: BandDesign,
    elements: Vec<ElementFill>,
}

impl BandFill {
    pub(crate) fn new(design: &BandDesign, variables: &[VariableDesign], context: &FillContext) -> Self {
        Self {
            design: design.clone(),
            elements: design
                .elements
                .iter()
                .map(|element| ElementFill::new(element, variables, context))
                .collect(),
        }
    }

    pub(crate) fn kind(&self) -> BandKind {
        self.design.kind
    }

    pub(crate) fn design(&self) -> &BandDesign {
        &self.design
    }

    pub(crate) fn is_split_prevented(&self) -> bool {
        self.design.split_type == SplitType::Prevent
    }

    pub(crate) fn evaluate(&mut self, ctx: &ElementContext<'_>, evaluation: Evaluation) -> FillResult<()> {
        for element in &mut self.elements {
            element.evaluate(ctx, evaluation)?;
        }
        Ok(())
    }

    /// Prepare and fill every element against `available` height.
    ///
    /// On a continuation pass the band is shifted up so that the topmost
    /// pending element starts at the top of the page.
    pub(crate) fn fill(
        &mut self,
        ctx: &ElementContext<'_>,
        available: u32,
        is_overflow: bool,
    ) -> FillResult<BandOutput> {
        ctx.shared.begin_band(self.design.overflow_allowed);
        let offset = if is_overflow {
            self.elements
                .iter()
                .filter(|element| element.is_pending())
                .map(ElementFill::design_y)
                .min()
                .unwrap_or(0)
        } else {
            0
        };
        let position = BandPosition {
            first_whole_band: ctx.shared.is_first_band_on_page(),
            offset,
        };

        let mut output = BandOutput::default();
        for element in &mut self.elements {
            let was_pending = element.is_pending();
            match element.prepare(ctx, &position, available, is_overflow)? {
                PrepareOutcome::Print { reprinted, overflows } => {
                    if reprinted {
                        tracing::trace!(target: targets::FILL, band = self.design.kind.name(), "element reprinted");
                    }
                    output.elements.push(element.fill()?);
                    output.staged.append(&mut element.take_staged());
                    output.progressed |= was_pending;
                    output.will_overflow |= overflows;
                    ctx.shared.mark_band_printed();
                }
                PrepareOutcome::Overflowed => output.will_overflow = true,
                PrepareOutcome::Suppressed => {}
            }
        }

        let content = output
            .elements
            .iter()
            .map(PrintElement::bottom)
            .max()
            .unwrap_or(0)
            .max(self.design.height.saturating_sub(offset));
        output.stretch = if output.will_overflow {
            available
        } else {
            content
        };
        if output.will_overflow && !self.design.overflow_allowed {
            tracing::debug!(
                target: targets::FILL,
                band = self.design.kind.name(),
                "band cannot overflow, clipping"
            );
            output.will_overflow = false;
        }
        Ok(output)
    }

    /// Undo the last pass so the band can be filled again on another page.
    pub(crate) fn rewind_prepared(&mut self, ctx: &ElementContext<'_>) -> FillResult<()> {
        for element in &mut self.elements {
            element.rewind_prepared(ctx)?;
        }
        Ok(())
    }

    pub(crate) fn rewind(&mut self) {
        for element in &mut self.elements {
            element.rewind();
        }
    }
}
