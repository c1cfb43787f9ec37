//! Transcript window: egui/eframe application.
//!
//! # Architecture
//!
//! [`TranscriptApp`] is the top-level [`eframe::App`].  It owns two channel
//! endpoints:
//!
//! * `events_rx`: receives [`UiEvent`]s (status strings and transcript
//!   turns) published by the conversation controller.
//! * `query_tx`: sends typed queries to the controller.  Dropping the app
//!   closes this channel, which shuts the controller down.
//!
//! # Layout
//!
//! | Area | Contents |
//! |------|----------|
//! | Top | Current status ("Listening", "Processing", wake prompt) |
//! | Centre | Scrolling transcript, one coloured line per turn |
//! | Bottom | Multi-line input, "Send Query", "Clear Display" |

use std::time::Duration;

use eframe::egui;
use tokio::sync::mpsc;

use crate::conversation::{ConversationTurn, Role, UiEvent};

const USER_COLOR: egui::Color32 = egui::Color32::from_rgb(100, 170, 255);
const ASSISTANT_COLOR: egui::Color32 = egui::Color32::from_rgb(80, 200, 120);
const STATUS_COLOR: egui::Color32 = egui::Color32::from_rgb(200, 200, 200);
const TIMESTAMP_COLOR: egui::Color32 = egui::Color32::from_rgb(120, 120, 120);

/// How often the window polls for controller events while idle.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// TranscriptApp
// ---------------------------------------------------------------------------

pub struct TranscriptApp {
    /// Latest status string from the controller.
    status: String,
    /// Turns shown in the transcript; "Clear Display" empties this only.
    turns: Vec<ConversationTurn>,
    /// Contents of the input box.
    input: String,
    /// Scroll to the newest turn on the next frame.
    scroll_to_end: bool,

    events_rx: mpsc::UnboundedReceiver<UiEvent>,
    query_tx: mpsc::UnboundedSender<String>,
}

impl TranscriptApp {
    pub fn new(
        events_rx: mpsc::UnboundedReceiver<UiEvent>,
        query_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            status: String::from("Starting"),
            turns: Vec::new(),
            input: String::new(),
            scroll_to_end: false,
            events_rx,
            query_tx,
        }
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    // ── Channel polling ──────────────────────────────────────────────────

    /// Drain all pending controller events (non-blocking).
    fn poll_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply(event);
        }
    }

    fn apply(&mut self, event: UiEvent) {
        match event {
            UiEvent::Status(status) => self.status = status,
            UiEvent::Turn(turn) => {
                self.turns.push(turn);
                self.scroll_to_end = true;
            }
        }
    }

    // ── Actions ──────────────────────────────────────────────────────────

    /// Send the input box contents as a query.  Blank input is kept.
    fn submit(&mut self) {
        let query = self.input.trim();
        if query.is_empty() {
            return;
        }
        if self.query_tx.send(query.to_string()).is_err() {
            log::warn!("ui: conversation has stopped, query dropped");
            return;
        }
        self.input.clear();
    }

    fn clear_display(&mut self) {
        self.turns.clear();
    }

    // ── Panels ───────────────────────────────────────────────────────────

    fn draw_status(&self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.label(egui::RichText::new("Status:").color(TIMESTAMP_COLOR));
            ui.label(egui::RichText::new(&self.status).color(STATUS_COLOR).strong());
        });
    }

    fn draw_transcript(&mut self, ui: &mut egui::Ui) {
        egui::ScrollArea::vertical()
            .auto_shrink([false, false])
            .stick_to_bottom(true)
            .show(ui, |ui| {
                for turn in &self.turns {
                    draw_turn(ui, turn);
                }
                if self.scroll_to_end {
                    ui.scroll_to_cursor(Some(egui::Align::BOTTOM));
                }
            });
        self.scroll_to_end = false;
    }

    fn draw_input(&mut self, ui: &mut egui::Ui) {
        let response = ui.add(
            egui::TextEdit::multiline(&mut self.input)
                .desired_rows(3)
                .desired_width(f32::INFINITY)
                .hint_text("Type a query…"),
        );

        // Ctrl+Enter sends; plain Enter inserts a newline.
        let ctrl_enter = response.has_focus()
            && ui.input(|i| i.key_pressed(egui::Key::Enter) && i.modifiers.command);

        ui.horizontal(|ui| {
            if ui.button("Send Query").clicked() || ctrl_enter {
                self.submit();
            }
            if ui.button("Clear Display").clicked() {
                self.clear_display();
            }
        });
    }
}

fn draw_turn(ui: &mut egui::Ui, turn: &ConversationTurn) {
    let color = match turn.role {
        Role::User => USER_COLOR,
        Role::Assistant => ASSISTANT_COLOR,
    };
    ui.horizontal_wrapped(|ui| {
        ui.label(
            egui::RichText::new(turn.timestamp.format("[%H:%M:%S]").to_string())
                .color(TIMESTAMP_COLOR)
                .monospace(),
        );
        ui.label(
            egui::RichText::new(format!("{}:", turn.role.label()))
                .color(color)
                .strong(),
        );
        ui.label(egui::RichText::new(&turn.content).color(color));
    });
}

// ---------------------------------------------------------------------------
// eframe::App impl
// ---------------------------------------------------------------------------

impl eframe::App for TranscriptApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_events();
        ctx.request_repaint_after(POLL_INTERVAL);

        egui::TopBottomPanel::top("status").show(ctx, |ui| {
            ui.add_space(4.0);
            self.draw_status(ui);
            ui.add_space(4.0);
        });

        egui::TopBottomPanel::bottom("input").show(ctx, |ui| {
            ui.add_space(4.0);
            self.draw_input(ui);
            ui.add_space(4.0);
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.draw_transcript(ui);
        });
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        log::info!("ui: transcript window closing");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
