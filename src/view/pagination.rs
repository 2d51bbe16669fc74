use serde::Serialize;

/// One page of a snapshot. Pages are 1-based.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub per_page: usize,
    pub total_items: usize,
    pub total_pages: usize,
}

impl<T> Page<T> {
    pub fn has_previous(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }

    /// 1-based position of the first item on this page, 0 when empty.
    pub fn first_index(&self) -> usize {
        if self.items.is_empty() {
            0
        } else {
            (self.page - 1) * self.per_page + 1
        }
    }
}

/// Slices `items` into the requested page.
///
/// The page number is clamped into `1..=total_pages`, so a list that shrinks
/// under a screen (e.g. after a delete) still lands on its last page.
pub fn paginate<T: Clone>(items: &[T], page: usize, per_page: usize) -> Page<T> {
    let per_page = per_page.max(1);
    let total_items = items.len();
    let total_pages = total_items.div_ceil(per_page).max(1);
    let page = page.clamp(1, total_pages);

    let start = (page - 1) * per_page;
    let end = (start + per_page).min(total_items);
    let items = if start < end {
        items[start..end].to_vec()
    } else {
        Vec::new()
    };

    Page {
        items,
        page,
        per_page,
        total_items,
        total_pages,
    }
}
