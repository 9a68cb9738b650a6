/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::logger::{INFO_SYMBOL, LOGGER_PREFIX};

/// A wrapper around indicatif ProgressBar
/// With custom styling from the logger
pub struct FlashProgress {
    pb: ProgressBar,
}

impl FlashProgress {
    pub fn new(total_size: u64) -> Self {
        let prefix = format!("{} {}", LOGGER_PREFIX.bold().yellow(), INFO_SYMBOL.yellow());

        let template = format!(
            "{}  [{{bar:40.yellow/red}}] {{bytes}}/{{total_bytes}} ({{elapsed}} / ETA: {{eta}}, {{bytes_per_sec}}) {{msg}}",
            prefix
        );
        let style = ProgressStyle::with_template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");

        let pb = ProgressBar::new(total_size);
        pb.set_style(style);
        Self { pb }
    }

    pub fn update(&self, done: u64, total: u64, msg: &'static str) {
        if self.pb.length() != Some(total) {
            self.pb.set_length(total);
        }
        self.pb.set_position(done);
        self.pb.set_message(msg);
    }

    /// A progress callback for the device operations. The bar is finished
    /// with `done_msg` once everything went through.
    pub fn callback<'a>(
        &'a self,
        msg: &'static str,
        done_msg: &'static str,
    ) -> impl FnMut(usize, usize) + Send + 'a {
        move |done, total| {
            self.update(done as u64, total as u64, msg);
            if done >= total {
                self.finish(done_msg);
            }
        }
    }

    pub fn finish(&self, msg: &'static str) {
        self.pb.finish_with_message(msg);
    }

    pub fn abandon(&self, msg: &'static str) {
        self.pb.abandon_with_message(msg);
    }
}
