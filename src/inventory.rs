//! Stock purchases and write-offs, with an audit log.

use std::cmp::Ordering;

use log::info;
use serde::{Deserialize, Serialize};

use crate::app_response::{AppResponse, Rejection};
use crate::identity::Session;
use crate::library::{load_book, save_book, Library};
use crate::local_db_model::InventoryTransaction;
use crate::local_db_state::new_id;
use crate::query::{Query, SortDirection};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryAdjustment {
    pub book_id: String,
    /// Positive for purchases, negative for write-offs.
    pub quantity_change: i64,
    /// Invoice number or write-off request reference.
    pub invoice_or_write_off: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionField {
    BookTitle,
    TransactionBy,
    QuantityChange,
    TotalNumber,
    InvoiceOrWriteOff,
    #[default]
    TransactionDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransactionQuery {
    /// Text field to filter on; one of `bookTitle`, `transactionBy`, `invoiceOrWriteOff`.
    pub filter_field: Option<TransactionField>,
    pub filter_value: String,
    pub sort_field: TransactionField,
    pub sort_order: SortDirection,
}

impl Default for TransactionQuery {
    fn default() -> Self {
        Self {
            filter_field: None,
            filter_value: String::new(),
            sort_field: TransactionField::TransactionDate,
            sort_order: SortDirection::Desc,
        }
    }
}

impl TransactionField {
    /// Whether the field holds free text and can be filtered on.
    pub fn is_text(self) -> bool {
        matches!(
            self,
            TransactionField::BookTitle
                | TransactionField::TransactionBy
                | TransactionField::InvoiceOrWriteOff
        )
    }

    fn text<'a>(self, transaction: &'a InventoryTransaction) -> Option<&'a str> {
        match self {
            TransactionField::BookTitle => Some(&transaction.book_title),
            TransactionField::TransactionBy => Some(&transaction.transaction_by),
            TransactionField::InvoiceOrWriteOff => Some(&transaction.invoice_or_write_off),
            _ => None,
        }
    }

    fn compare(self, a: &InventoryTransaction, b: &InventoryTransaction) -> Ordering {
        match self {
            TransactionField::BookTitle => a.book_title.cmp(&b.book_title),
            TransactionField::TransactionBy => a.transaction_by.cmp(&b.transaction_by),
            TransactionField::QuantityChange => a.quantity_change.cmp(&b.quantity_change),
            TransactionField::TotalNumber => a.total_number.cmp(&b.total_number),
            TransactionField::InvoiceOrWriteOff => a.invoice_or_write_off.cmp(&b.invoice_or_write_off),
            TransactionField::TransactionDate => a.transaction_date.cmp(&b.transaction_date),
        }
    }
}

impl Library {
    /// Adds or writes off copies of a book and logs the change.
    ///
    /// `totalNumber` and `currentStock` move by the same amount: an
    /// adjustment resizes the pool, it never touches reserved or rented copies.
    pub fn adjust_inventory(
        &self,
        session: &Session,
        adjustment: &InventoryAdjustment,
    ) -> Result<InventoryTransaction, AppResponse> {
        session.require_admin("adjust inventory")?;

        if adjustment.quantity_change == 0 {
            return Err(Rejection::ZeroQuantityChange.into());
        }
        let reference = adjustment.invoice_or_write_off.trim();
        if reference.is_empty() {
            return Err(Rejection::MissingReference.into());
        }

        let now = self.now();
        let transaction = self.store().write(|txn| {
            let mut book = load_book(txn, &adjustment.book_id)?;
            let change = adjustment.quantity_change;

            if change < 0 && change.unsigned_abs() > u64::from(book.current_stock) {
                return Err(Rejection::DisposalExceedsStock {
                    requested: change.unsigned_abs(),
                    available: book.current_stock,
                }
                .into());
            }

            book.total_number = apply_change(book.total_number, change)?;
            book.current_stock = apply_change(book.current_stock, change)?;
            save_book(txn, &book)?;

            let transaction = InventoryTransaction {
                id: new_id(),
                book_id: book.id.clone(),
                book_title: book.title.clone(),
                transaction_by: session.email.clone(),
                quantity_change: change,
                invoice_or_write_off: reference.to_string(),
                transaction_date: now,
                total_number: book.total_number,
            };
            txn.insert(&transaction)?;
            Ok(transaction)
        })?;

        info!(
            "Inventory of '{}' changed by {} (now {}) ref {}",
            transaction.book_title,
            transaction.quantity_change,
            transaction.total_number,
            transaction.invoice_or_write_off
        );
        Ok(transaction)
    }

    /// The inventory log, filtered and sorted as requested.
    pub fn list_inventory_transactions(
        &self,
        session: &Session,
        request: &TransactionQuery,
    ) -> Result<Vec<InventoryTransaction>, AppResponse> {
        session.require_admin("view inventory transactions")?;

        let mut transactions: Vec<InventoryTransaction> = self.store().query_as(&Query::new())?;

        if let Some(field) = request.filter_field {
            let needle = request.filter_value.to_lowercase();
            if !field.is_text() {
                return Err(AppResponse::ValidationError(format!(
                    "Cannot filter inventory transactions by {field:?}"
                )));
            }
            transactions.retain(|t| {
                field
                    .text(t)
                    .is_some_and(|value| value.to_lowercase().contains(&needle))
            });
        }

        transactions.sort_by(|a, b| {
            let ordering = request.sort_field.compare(a, b);
            match request.sort_order {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        });
        Ok(transactions)
    }
}

fn apply_change(value: u32, change: i64) -> Result<u32, AppResponse> {
    i64::from(value)
        .checked_add(change)
        .and_then(|updated| u32::try_from(updated).ok())
        .ok_or_else(|| {
            AppResponse::ValidationError(format!(
                "Quantity change {change} would take a count of {value} out of range"
            ))
        })
}
