//! Prompt templates.
//!
//! A template is plain text with `{placeholder}` markers. Recognized
//! placeholders are `{fen}`, `{side_to_move}`, `{legal_moves}` (UCI),
//! `{legal_moves_san}`, `{heuristics}` and `{instructions}`. Anything else
//! in braces is left untouched.

use crate::board::BoardState;
use crate::heuristics::PositionSummary;

pub const DEFAULT_INSTRUCTIONS: &str = "Select the best move. Keep your thinking to 2 sentences or less, then output your chosen move.\nFormat:\n<think>brief thinking (2 sentences max)</think>\n<uci_move>your_move</uci_move>";

pub const DEFAULT_TEMPLATE: &str = "You are an expert chess player. Here is the position in FEN format:\n{fen}\n\nLegal moves: {legal_moves}\n\n{instructions}";

#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
    instructions: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE, DEFAULT_INSTRUCTIONS)
    }
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            instructions: instructions.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    pub fn render(&self, board: &BoardState) -> String {
        let mut out = self.template.clone();
        // heuristics are only computed when asked for
        if out.contains("{heuristics}") {
            out = out.replace("{heuristics}", &PositionSummary::of(board).to_string());
        }
        if out.contains("{legal_moves_san}") {
            out = out.replace("{legal_moves_san}", &legal_list(board, true));
        }
        if out.contains("{legal_moves}") {
            out = out.replace("{legal_moves}", &legal_list(board, false));
        }
        let side = if board.turn().is_white() { "White" } else { "Black" };
        out.replace("{fen}", &board.fen())
            .replace("{side_to_move}", side)
            .replace("{instructions}", &self.instructions)
    }
}

fn legal_list(board: &BoardState, san: bool) -> String {
    board
        .legal_moves()
        .into_iter()
        .map(|m| if san { board.san_plain(m) } else { board.uci(m) })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Append the heuristic summary to an evaluator-written prompt.
pub fn augment_with_heuristics(prompt: &str, board: &BoardState) -> String {
    format!(
        "{prompt}\n\nHeuristics: {}",
        PositionSummary::of(board)
    )
}
