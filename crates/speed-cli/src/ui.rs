//! UI utilities for Speed CLI.

use std::io::{self, Write};

use speed_core::file::format_size;
use speed_core::session::Status;
use speed_core::transfer::{TransferProgress, TransferState};
use tokio::sync::watch;

const BOX_WIDTH: usize = 33;

/// A formatted box for displaying a room ID.
pub struct RoomBox<'a> {
    room_id: &'a str,
    hint: Option<&'a str>,
}

impl<'a> RoomBox<'a> {
    /// Create a new room box.
    #[must_use]
    pub const fn new(room_id: &'a str) -> Self {
        Self {
            room_id,
            hint: None,
        }
    }

    /// Add a hint line below the ID.
    #[must_use]
    pub const fn with_hint(mut self, hint: &'a str) -> Self {
        self.hint = Some(hint);
        self
    }

    /// Display the room box to stdout.
    pub fn display(&self) {
        let id_line = format!("Room ID:  {}", self.room_id);

        println!("  ┌{}┐", "─".repeat(BOX_WIDTH));
        println!("  │{}│", " ".repeat(BOX_WIDTH));
        println!("  │{}│", center_in_box(&id_line, BOX_WIDTH));
        println!("  │{}│", " ".repeat(BOX_WIDTH));

        if let Some(hint) = self.hint {
            println!("  │{}│", center_in_box(hint, BOX_WIDTH));
            println!("  │{}│", " ".repeat(BOX_WIDTH));
        }

        println!("  └{}┘", "─".repeat(BOX_WIDTH));
    }
}

fn center_in_box(content: &str, width: usize) -> String {
    let content_len = content.chars().count();
    let padding = width.saturating_sub(content_len);
    let left = padding / 2;
    let right = padding - left;
    format!("{}{}{}", " ".repeat(left), content, " ".repeat(right))
}

fn progress_line(progress: &TransferProgress) -> String {
    format!(
        "\r  [{:>3}%] {} - {}/s    ",
        progress.percent,
        progress.file_name,
        format_size(progress.speed_bps())
    )
}

/// Print status changes and a live progress line until the peer goes away.
///
/// Routine statuses (ready, selected, sent, local complete) are not printed.
pub async fn follow_session(
    mut status: watch::Receiver<Status>,
    mut progress: watch::Receiver<TransferProgress>,
) {
    let mut line_open = false;
    let mut shown = status.borrow_and_update().clone();

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                if progress.has_changed().unwrap_or(false) {
                    let current = progress.borrow_and_update().clone();
                    if line_open || current.state == TransferState::Transferring {
                        print!("{}", progress_line(&current));
                        line_open = true;
                    }
                }
                shown = status.borrow_and_update().clone();
                if line_open {
                    println!();
                    line_open = false;
                }
                print_status(&shown);
            }
            changed = progress.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = progress.borrow_and_update().clone();
                if current.state == TransferState::Transferring
                    || (line_open && current.state == TransferState::Completed)
                {
                    print!("{}", progress_line(&current));
                    let _ = io::stdout().flush();
                    line_open = true;
                }
            }
        }
    }

    if line_open {
        println!();
    }

    // The progress side can close first and leave the last status unseen.
    let last = status.borrow().clone();
    if last != shown {
        print_status(&last);
    }
}

fn print_status(status: &Status) {
    if status.is_error() {
        eprintln!("  {status}");
    } else if !status.is_notice() {
        println!("  {status}");
    }
}
