// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use super::resource::{SoftBuffer, SoftTexture};
use super::{Shared, SoftDevice};
use crate::gpu::{
    CommandList, DeviceError, Footprint, QueueClass, ResourceState, permitted_on,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone)]
pub(super) enum Command {
    Copy {
        source: SoftBuffer,
        footprint: Footprint,
        dest: SoftTexture,
    },
    Transition {
        texture: SoftTexture,
        before: ResourceState,
        after: ResourceState,
    },
    Clear {
        target: SoftTexture,
        texel: [u8; 4],
    },
}

/// Commands captured from a closed list at submit time.
#[derive(Debug)]
pub(super) struct Batch {
    pub(super) label: String,
    pub(super) class: QueueClass,
    pub(super) commands: Vec<Command>,
    in_flight: Arc<AtomicUsize>,
}

impl Batch {
    /// Runs the batch against CPU memory.
    pub(super) fn execute(self, shared: &Shared) {
        let mut touched: Vec<SoftTexture> = Vec::new();
        for command in &self.commands {
            match command {
                Command::Copy {
                    source,
                    footprint,
                    dest,
                } => {
                    if dest.state() != ResourceState::CopyDest {
                        shared.violation(format!(
                            "{}: copy into {} in state {:?}",
                            self.label,
                            dest.label(),
                            dest.state()
                        ));
                    }
                    source.with_bytes(|bytes| {
                        for y in 0..footprint.rows {
                            let range = footprint.row_range(y);
                            if range.end > bytes.len() {
                                shared.violation(format!(
                                    "{}: copy reads past the end of {}",
                                    self.label,
                                    source.label()
                                ));
                                break;
                            }
                            dest.write_row(y, &bytes[range]);
                        }
                    });
                    source.end_read();
                    touched.push(dest.clone());
                }
                Command::Transition {
                    texture,
                    before,
                    after,
                } => {
                    let actual = texture.state();
                    if actual != *before {
                        shared.violation(format!(
                            "{}: barrier on {} expects {:?} but it is {:?}",
                            self.label,
                            texture.label(),
                            before,
                            actual
                        ));
                    }
                    texture.set_state(*after);
                    touched.push(texture.clone());
                }
                Command::Clear { target, texel } => {
                    if target.state() != ResourceState::RenderTarget {
                        shared.violation(format!(
                            "{}: clear of {} in state {:?}",
                            self.label,
                            target.label(),
                            target.state()
                        ));
                    }
                    target.fill(*texel);
                }
            }
        }
        if self.class == QueueClass::Copy {
            for texture in touched {
                texture.set_state(ResourceState::Common);
            }
        }
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    /// Drops the batch unexecuted.  Buffers whose pending reads were counted at submit are
    /// released, and the list no longer counts as executing.
    pub(super) fn abandon(self) {
        for command in &self.commands {
            if let Command::Copy { source, .. } = command {
                source.end_read();
            }
        }
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/**
A recorded command list.

A new list is open for recording.  Submitting requires a closed list; resetting requires that no
earlier submission of it is still executing.
*/
#[derive(Debug)]
pub struct SoftCommandList {
    class: QueueClass,
    label: String,
    commands: Vec<Command>,
    closed: bool,
    in_flight: Arc<AtomicUsize>,
    shared: Arc<Shared>,
}

impl SoftCommandList {
    pub(super) fn new(class: QueueClass, label: &str, shared: Arc<Shared>) -> Self {
        SoftCommandList {
            class,
            label: label.to_string(),
            commands: Vec::new(),
            closed: false,
            in_flight: Arc::new(AtomicUsize::new(0)),
            shared,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of recorded commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Submissions of this list that have not finished executing.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub(super) fn batch(&self) -> Batch {
        for command in &self.commands {
            if let Command::Copy { source, .. } = command {
                source.begin_read();
            }
        }
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Batch {
            label: self.label.clone(),
            class: self.class,
            commands: self.commands.clone(),
            in_flight: self.in_flight.clone(),
        }
    }

    fn record(&mut self, command: Command) {
        if self.closed {
            self.shared
                .violation(format!("{}: recording into a closed list", self.label));
            return;
        }
        self.commands.push(command);
    }
}

fn texel_from(color: [f32; 4]) -> [u8; 4] {
    color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
}

impl CommandList<SoftDevice> for SoftCommandList {
    fn class(&self) -> QueueClass {
        self.class
    }

    fn reset(&mut self) -> Result<(), DeviceError> {
        if self.in_flight() > 0 {
            let message = format!("{}: reset while the GPU is still executing it", self.label);
            self.shared.violation(message.clone());
            return Err(DeviceError::Validation(message));
        }
        self.commands.clear();
        self.closed = false;
        Ok(())
    }

    fn copy_buffer_to_texture(
        &mut self,
        source: &SoftBuffer,
        footprint: &Footprint,
        dest: &SoftTexture,
    ) {
        if footprint.end() > source.len() as u64 {
            self.shared.violation(format!(
                "{}: footprint of {} bytes exceeds {} ({} bytes)",
                self.label,
                footprint.end(),
                source.label(),
                source.len()
            ));
            return;
        }
        if footprint.width != dest.width() || footprint.height != dest.height() {
            self.shared.violation(format!(
                "{}: footprint {}x{} doesn't match {} ({}x{})",
                self.label,
                footprint.width,
                footprint.height,
                dest.label(),
                dest.width(),
                dest.height()
            ));
            return;
        }
        self.record(Command::Copy {
            source: source.clone(),
            footprint: *footprint,
            dest: dest.clone(),
        });
    }

    fn transition(&mut self, texture: &SoftTexture, before: ResourceState, after: ResourceState) {
        for state in [before, after] {
            if !permitted_on(self.class, state) {
                self.shared.violation(format!(
                    "{}: {:?} is not a valid barrier state on a {:?} list",
                    self.label, state, self.class
                ));
            }
        }
        self.record(Command::Transition {
            texture: texture.clone(),
            before,
            after,
        });
    }

    fn clear(&mut self, target: &SoftTexture, color: [f32; 4]) {
        if self.class != QueueClass::Graphics {
            self.shared.violation(format!(
                "{}: clear recorded on a {:?} list",
                self.label, self.class
            ));
            return;
        }
        self.record(Command::Clear {
            target: target.clone(),
            texel: texel_from(color),
        });
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        if self.closed {
            let message = format!("{}: closed twice", self.label);
            self.shared.violation(message.clone());
            return Err(DeviceError::Validation(message));
        }
        self.closed = true;
        Ok(())
    }
}
