//! Terminal rendering of slot events and the final summary

use chorus_core::types::SlotStatus;
use chorus_core::{SlotEvent, SlotEventKind, TurnOutcome};
use std::io::Write;

/// Interleaves several slot streams on one writer. A `[model]` header is
/// printed whenever output switches to another slot.
pub struct StreamPrinter<W: Write> {
    out: W,
    show_reasoning: bool,
    current: Option<(String, bool)>,
}

impl<W: Write> StreamPrinter<W> {
    pub fn new(out: W, show_reasoning: bool) -> Self {
        Self {
            out,
            show_reasoning,
            current: None,
        }
    }

    pub fn slot_event(&mut self, event: &SlotEvent) -> std::io::Result<()> {
        match &event.kind {
            SlotEventKind::ContentAppended { text } => self.write_text(event, false, text),
            SlotEventKind::ReasoningAppended { text } if self.show_reasoning => {
                self.write_text(event, true, text)
            }
            _ => Ok(()),
        }
    }

    fn write_text(&mut self, event: &SlotEvent, reasoning: bool, text: &str) -> std::io::Result<()> {
        self.switch_to(event, reasoning)?;
        write!(self.out, "{}", text)?;
        self.out.flush()
    }

    fn switch_to(&mut self, event: &SlotEvent, reasoning: bool) -> std::io::Result<()> {
        let same = self
            .current
            .as_ref()
            .map_or(false, |(slot_id, was_reasoning)| {
                slot_id == &event.slot_id && *was_reasoning == reasoning
            });
        if same {
            return Ok(());
        }
        if self.current.is_some() {
            writeln!(self.out)?;
        }
        if reasoning {
            write!(self.out, "[{} thinking] ", event.model_id)?;
        } else {
            write!(self.out, "[{}] ", event.model_id)?;
        }
        self.current = Some((event.slot_id.clone(), reasoning));
        Ok(())
    }

    /// Ends the stream section with a newline if anything was printed.
    pub fn finish(&mut self) -> std::io::Result<()> {
        if self.current.take().is_some() {
            writeln!(self.out)?;
        }
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

fn status_label(status: SlotStatus) -> &'static str {
    match status {
        SlotStatus::Pending => "pending",
        SlotStatus::Streaming => "streaming",
        SlotStatus::Success => "success",
        SlotStatus::Error => "error",
        SlotStatus::Cancelled => "cancelled",
    }
}

pub fn write_summary(out: &mut impl Write, outcome: &TurnOutcome) -> std::io::Result<()> {
    let width = outcome
        .slots
        .iter()
        .map(|slot| slot.model_id.chars().count())
        .max()
        .unwrap_or(0);

    writeln!(out, "--- summary ---")?;
    for slot in &outcome.slots {
        write!(out, "{:<width$}  {:<9}", slot.model_id, status_label(slot.status), width = width)?;
        if let Some(usage) = slot.usage {
            write!(
                out,
                "  tokens {}/{}/{}",
                usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
            )?;
        }
        if let Some(error) = &slot.error {
            write!(out, "  {}", error)?;
        }
        writeln!(out)?;
    }
    writeln!(
        out,
        "{} succeeded, {} failed, {} cancelled",
        outcome.succeeded(),
        outcome.failed(),
        outcome.cancelled()
    )
}
