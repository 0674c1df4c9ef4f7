pub mod string;

use anyhow::Result;
use mdbook::book::{Book, Chapter};
use mdbook::BookItem;

/// Applies `func` to every chapter of the book, stopping at the first error.
pub fn map_chapter(
    book: &mut Book,
    func: &mut dyn FnMut(&mut Chapter) -> Result<()>,
) -> Result<()> {
    let mut err = None;
    book.for_each_mut(|item| {
        if err.is_some() {
            return;
        }
        if let BookItem::Chapter(chapter) = item {
            if let Err(e) = func(chapter) {
                err = Some(e);
            }
        }
    });

    match err {
        None => Ok(()),
        Some(err) => Err(err),
    }
}
