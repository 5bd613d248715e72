use rand::{seq::SliceRandom, Rng};
use std::{collections::VecDeque, time::Duration};
use tracing::debug;

use super::track::Track;

/// Dónde se inserta un lote nuevo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertMode {
    /// Al final de la cola.
    #[default]
    Append,
    /// Justo después de la canción actual.
    Front,
}

/// Cola ordenada de tracks con un cursor a la canción actual.
///
/// El cursor es `None` o un índice válido dentro de `items`. Las canciones ya
/// reproducidas se descartan al avanzar, así que durante la reproducción el
/// cursor suele quedar en la posición 0.
#[derive(Debug, Default)]
pub struct Queue {
    items: VecDeque<Track>,
    cursor: Option<usize>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agrega un lote, mezclándolo si se pide. Devuelve el índice del primer track insertado.
    pub fn enqueue(&mut self, batch: Vec<Track>, mode: InsertMode, shuffle: bool) -> usize {
        self.enqueue_with_rng(batch, mode, shuffle, &mut rand::thread_rng())
    }

    pub fn enqueue_with_rng<R: Rng + ?Sized>(
        &mut self,
        mut batch: Vec<Track>,
        mode: InsertMode,
        shuffle: bool,
        rng: &mut R,
    ) -> usize {
        // El shuffle solo afecta al lote nuevo, nunca a lo que ya estaba en cola
        if shuffle {
            batch.shuffle(rng);
        }

        let count = batch.len();
        let index = match mode {
            InsertMode::Append => {
                let index = self.items.len();
                self.items.extend(batch);
                index
            }
            InsertMode::Front => {
                let index = self.cursor.map_or(0, |cursor| cursor + 1);
                for (offset, track) in batch.into_iter().enumerate() {
                    self.items.insert(index + offset, track);
                }
                index
            }
        };

        debug!("➕ {} tracks insertados en la posición {}", count, index);
        index
    }

    /// Coloca el cursor en la primera entrada si no había canción actual.
    pub fn start(&mut self) -> Option<&Track> {
        if self.cursor.is_none() && !self.items.is_empty() {
            self.cursor = Some(0);
        }
        self.current()
    }

    /// Descarta la canción actual y las `count - 1` siguientes.
    ///
    /// El cursor queda sobre la siguiente entrada restante, o en `None` si la
    /// cola se vació. Devuelve cuántas entradas se descartaron.
    pub fn advance(&mut self, count: usize) -> usize {
        let Some(cursor) = self.cursor else {
            return 0;
        };

        let end = cursor.saturating_add(count).min(self.items.len());
        let discarded = self.items.drain(cursor..end).count();
        self.cursor = (cursor < self.items.len()).then_some(cursor);
        discarded
    }

    /// Elimina la entrada en `index`, ajustando el cursor.
    pub fn remove(&mut self, index: usize) -> Option<Track> {
        let removed = self.items.remove(index)?;

        self.cursor = match self.cursor {
            Some(cursor) if index < cursor => Some(cursor - 1),
            Some(cursor) if index == cursor => (cursor < self.items.len()).then_some(cursor),
            other => other,
        };

        Some(removed)
    }

    /// Elimina las entradas posteriores a la actual. Devuelve cuántas se quitaron.
    pub fn clear_upcoming(&mut self) -> usize {
        let keep = self.cursor.map_or(0, |cursor| cursor + 1);
        let removed = self.items.len().saturating_sub(keep);
        self.items.truncate(keep);
        removed
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.cursor = None;
    }

    pub fn current(&self) -> Option<&Track> {
        self.cursor.and_then(|cursor| self.items.get(cursor))
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Entradas pendientes después de la actual.
    pub fn upcoming(&self) -> impl Iterator<Item = &Track> {
        let skip = self.cursor.map_or(0, |cursor| cursor + 1);
        self.items.iter().skip(skip)
    }

    pub fn upcoming_len(&self) -> usize {
        let skip = self.cursor.map_or(0, |cursor| cursor + 1);
        self.items.len().saturating_sub(skip)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            current: self.current().cloned(),
            upcoming: self.upcoming().cloned().collect(),
            total_duration: self.total_duration(),
        }
    }

    fn total_duration(&self) -> Duration {
        let skip = self.cursor.unwrap_or(0);
        self.items.iter().skip(skip).filter_map(Track::duration).sum()
    }
}

/// Copia inmutable de la cola para renderizar.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSnapshot {
    pub current: Option<Track>,
    pub upcoming: Vec<Track>,
    pub total_duration: Duration,
}

impl QueueSnapshot {
    /// Obtiene una página específica de la cola (empieza en 1)
    pub fn page(&self, page: usize, items_per_page: usize) -> QueuePage {
        let items_per_page = items_per_page.max(1);
        let total_items = self.upcoming.len();
        let total_pages = total_items.div_ceil(items_per_page).max(1);
        let current_page = page.clamp(1, total_pages);
        let start = (current_page - 1) * items_per_page;
        let end = (start + items_per_page).min(total_items);

        QueuePage {
            items: self.upcoming[start..end].to_vec(),
            current_page,
            total_pages,
            total_items,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuePage {
    pub items: Vec<Track>,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}
