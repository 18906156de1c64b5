use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Weak},
};

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::{Device, ErrorHandler, Errors, GridError, Handler};

pub const DEFAULT_NAME: &str = "monome row";

struct RowInner {
    prefix: String,
    members: Vec<Box<dyn Device>>,
    offsets: Vec<u8>,
    /// `(offset, member index)`, sorted by offset.
    columns: Vec<(u8, usize)>,
    indices: HashMap<String, usize>,
    rows: u8,
    cols: u8,
}

/// Several grids side by side, addressed as one wider grid. Member `i`
/// covers the columns starting at the sum of the widths of the members in
/// front of it.
#[derive(Clone)]
pub struct RowConnection {
    inner: Arc<RowInner>,
}

impl RowConnection {
    pub fn builder() -> RowConnectionBuilder {
        RowConnectionBuilder::new()
    }

    pub fn new(name: &str, members: Vec<Box<dyn Device>>) -> Self {
        let prefix = if name.is_empty() { DEFAULT_NAME } else { name };

        let mut offsets = Vec::with_capacity(members.len());
        let mut indices = HashMap::with_capacity(members.len());
        let mut cols = 0u8;
        let mut too_wide = false;
        for (index, member) in members.iter().enumerate() {
            offsets.push(cols);
            cols = cols.checked_add(member.cols()).unwrap_or_else(|| {
                too_wide = true;
                u8::MAX
            });
            indices.insert(member.name(), index);
        }
        if too_wide {
            warn!(
                "Row device {} is wider than {} columns, the columns past that are unreachable",
                prefix,
                u8::MAX
            );
        }
        let mut columns: Vec<_> = offsets.iter().copied().zip(0..).collect();
        columns.sort();
        let rows = members.iter().map(|m| m.rows()).min().unwrap_or(0);

        info!(
            "Joined {} devices into row device {} ({}x{})",
            members.len(),
            prefix,
            rows,
            cols
        );
        Self {
            inner: Arc::new(RowInner {
                prefix: prefix.to_owned(),
                members,
                offsets,
                columns,
                indices,
                rows,
                cols,
            }),
        }
    }

    pub fn members(&self) -> &[Box<dyn Device>] {
        &self.inner.members
    }

    /// Position of the member called `name`. With duplicate names the last
    /// one wins.
    pub fn member_index(&self, name: &str) -> Option<usize> {
        self.inner.indices.get(name).copied()
    }

    pub fn offset(&self, index: usize) -> Option<u8> {
        self.inner.offsets.get(index).copied()
    }

    /// The member covering column `y` and the offset of its first column.
    fn locate(&self, x: u8, y: u8) -> Result<(&dyn Device, u8), GridError> {
        let out_of_range = || GridError::OutOfRange {
            device: self.name(),
            x,
            y,
        };
        if y >= self.inner.cols {
            return Err(out_of_range());
        }
        let (offset, index) = self
            .inner
            .columns
            .iter()
            .rev()
            .find(|(offset, _)| *offset <= y)
            .ok_or_else(out_of_range)?;
        Ok((self.inner.members[*index].as_ref(), *offset))
    }
}

#[async_trait]
impl Device for RowConnection {
    fn name(&self) -> String {
        format!("{}{}", self.inner.prefix, self.num_buttons())
    }

    fn rows(&self) -> u8 {
        self.inner.rows
    }

    fn cols(&self) -> u8 {
        self.inner.cols
    }

    async fn set(&self, x: u8, y: u8, brightness: u8) -> Result<(), GridError> {
        let (member, offset) = self.locate(x, y)?;
        member
            .set(x, y - offset, brightness)
            .await
            .map_err(|e| {
                e.with_task(format!(
                    "set brightness to {brightness} ({x}/{y} in row device)"
                ))
            })
    }

    async fn switch(&self, x: u8, y: u8, on: bool) -> Result<(), GridError> {
        let brightness = if on { 15 } else { 0 };
        self.set(x, y, brightness).await.map_err(|e| {
            e.with_task(format!(
                "switch {} ({x}/{y} in row device)",
                if on { "on" } else { "off" }
            ))
        })
    }

    /// Fans out to the members, so members taller than the row are covered
    /// too.
    async fn switch_all(&self, on: bool) -> Result<(), GridError> {
        let mut errors = Errors::new(format!(
            "switch all {} (row device)",
            if on { "on" } else { "off" }
        ));
        for member in &self.inner.members {
            errors.push(member.switch_all(on).await);
        }
        errors.into_result()
    }

    fn set_handler(&self, handler: Arc<dyn Handler>) {
        for (member, offset) in self.inner.members.iter().zip(&self.inner.offsets) {
            member.set_handler(Arc::new(Translate {
                row: Arc::downgrade(&self.inner),
                offset: *offset,
                handler: handler.clone(),
            }));
        }
    }

    fn start_listening(&self, on_error: Option<ErrorHandler>) {
        for member in &self.inner.members {
            member.start_listening(on_error.clone());
        }
    }

    async fn stop_listening(&self) {
        for member in &self.inner.members {
            member.stop_listening().await;
        }
    }

    async fn close(&self) -> Result<(), GridError> {
        let mut errors = Errors::new("close row device");
        for member in &self.inner.members {
            errors.push(member.close().await);
        }
        errors.into_result()
    }

    fn is_closed(&self) -> bool {
        self.inner.members.iter().all(|m| m.is_closed())
    }

    async fn read_message(&self) -> Result<(), GridError> {
        panic!(
            "read_message must not be called on row device {}, its members are polled on their own",
            self.name()
        )
    }
}

impl fmt::Display for RowConnection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Moves key events of one member into the coordinates of the row.
struct Translate {
    row: Weak<RowInner>,
    offset: u8,
    handler: Arc<dyn Handler>,
}

#[async_trait]
impl Handler for Translate {
    async fn handle(&self, source: &dyn Device, x: u8, y: u8, down: bool) {
        let Some(inner) = self.row.upgrade() else {
            debug!("Row device of {} is gone, dropping key event", source.name());
            return;
        };
        let row = RowConnection { inner };
        self.handler
            .handle(&row, x, self.offset.saturating_add(y), down)
            .await;
    }
}

#[derive(Default)]
pub struct RowConnectionBuilder {
    name: String,
    members: Vec<Box<dyn Device>>,
}

impl RowConnectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_owned();
        self
    }

    pub fn with(mut self, member: impl Device + 'static) -> Self {
        self.members.push(Box::new(member));
        self
    }

    pub fn build(self) -> RowConnection {
        RowConnection::new(&self.name, self.members)
    }
}
