//! Sorting, page requests and page results.
//!
//! # Invariants
//! - Page indexes are zero-based.
//! - `Page::content().len() <= Page::size()` for every constructed page.
//! - `total_elements` is `None` only for windowed pages.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// One ordering term over an entity field name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub field: String,
    pub direction: Direction,
}

impl Order {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Desc,
        }
    }
}

/// Ordered list of [`Order`] terms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    orders: Vec<Order>,
}

impl Sort {
    pub fn unsorted() -> Self {
        Self::default()
    }

    /// Sorts by each field in turn with one shared direction.
    pub fn by(direction: Direction, fields: &[&str]) -> Self {
        Self {
            orders: fields
                .iter()
                .map(|field| Order {
                    field: (*field).to_string(),
                    direction,
                })
                .collect(),
        }
    }

    pub fn and(mut self, order: Order) -> Self {
        self.orders.push(order);
        self
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn is_sorted(&self) -> bool {
        !self.orders.is_empty()
    }
}

/// Requested page: zero-based index, page size and optional sort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
    pub sort: Sort,
}

impl PageRequest {
    pub fn of(page: u32, size: u32) -> Self {
        Self::of_sorted(page, size, Sort::unsorted())
    }

    pub fn of_sorted(page: u32, size: u32, sort: Sort) -> Self {
        Self { page, size, sort }
    }

    /// Row offset of the first element on this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.size)
    }

    pub fn next(&self) -> Self {
        Self {
            page: self.page.saturating_add(1),
            size: self.size,
            sort: self.sort.clone(),
        }
    }
}

/// One page of results plus navigation metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    content: Vec<T>,
    number: u32,
    size: u32,
    total_elements: Option<u64>,
    has_next: bool,
}

impl<T> Page<T> {
    /// Builds a page whose total is known.
    pub fn counted(content: Vec<T>, request: &PageRequest, total_elements: u64) -> Self {
        let has_next = request.offset() + u64::from(request.size) < total_elements;
        Self {
            content,
            number: request.page,
            size: request.size,
            total_elements: Some(total_elements),
            has_next,
        }
    }

    /// Builds a page from a `size + 1` over-fetch, trimming the lookahead row.
    pub fn windowed(mut content: Vec<T>, request: &PageRequest) -> Self {
        let size = request.size as usize;
        let has_next = content.len() > size;
        content.truncate(size);
        Self {
            content,
            number: request.page,
            size: request.size,
            total_elements: None,
            has_next,
        }
    }

    pub fn content(&self) -> &[T] {
        &self.content
    }

    pub fn into_content(self) -> Vec<T> {
        self.content
    }

    /// Zero-based page index.
    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn number_of_elements(&self) -> usize {
        self.content.len()
    }

    /// Total element count, unknown for windowed pages.
    pub fn total_elements(&self) -> Option<u64> {
        self.total_elements
    }

    /// `ceil(total / size)`; `None` when the total is unknown.
    pub fn total_pages(&self) -> Option<u64> {
        let total = self.total_elements?;
        if self.size == 0 {
            return Some(0);
        }
        Some(total.div_ceil(u64::from(self.size)))
    }

    pub fn is_first(&self) -> bool {
        self.number == 0
    }

    pub fn is_last(&self) -> bool {
        !self.has_next
    }

    pub fn has_next(&self) -> bool {
        self.has_next
    }

    pub fn has_previous(&self) -> bool {
        self.number > 0
    }

    /// Converts content while keeping page metadata.
    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            content: self.content.into_iter().map(f).collect(),
            number: self.number,
            size: self.size,
            total_elements: self.total_elements,
            has_next: self.has_next,
        }
    }

    /// Fallible variant of [`Page::map`].
    pub fn try_map<U, E, F>(self, f: F) -> Result<Page<U>, E>
    where
        F: FnMut(T) -> Result<U, E>,
    {
        Ok(Page {
            content: self.content.into_iter().map(f).collect::<Result<_, _>>()?,
            number: self.number,
            size: self.size,
            total_elements: self.total_elements,
            has_next: self.has_next,
        })
    }
}
