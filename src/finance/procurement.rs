//! Procurement rules: budget checks, inventory health and approvals

use super::{format_money, lenient};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub const PO_SHEET: &str = "PO's";
pub const BUDGET_SHEET: &str = "Budgets";
pub const SPEND_SHEET: &str = "Spend";
pub const INVENTORY_SHEET: &str = "Inventory";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PurchaseOrder {
    #[serde(rename = "Item", deserialize_with = "lenient::text")]
    pub item: String,
    #[serde(rename = "Category", deserialize_with = "lenient::text")]
    pub category: String,
    #[serde(rename = "Qty", deserialize_with = "lenient::amount")]
    pub qty: f64,
    #[serde(rename = "Price", deserialize_with = "lenient::amount")]
    pub price: f64,
    #[serde(rename = "Vendor", default, deserialize_with = "lenient::text")]
    pub vendor: String,
    #[serde(rename = "Date", default, deserialize_with = "lenient::text")]
    pub date: String,
}

impl PurchaseOrder {
    pub fn cost(&self) -> f64 {
        self.qty * self.price
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    #[serde(rename = "Category", deserialize_with = "lenient::text")]
    pub category: String,
    #[serde(rename = "Budget Amount", deserialize_with = "lenient::amount")]
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spend {
    #[serde(rename = "Category", deserialize_with = "lenient::text")]
    pub category: String,
    #[serde(rename = "Amount Spent", default, deserialize_with = "lenient::amount")]
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryItem {
    #[serde(rename = "Item", deserialize_with = "lenient::text")]
    pub item: String,
    #[serde(rename = "Category", default, deserialize_with = "lenient::text")]
    pub category: String,
    #[serde(rename = "Current Stock", deserialize_with = "lenient::count")]
    pub current_stock: i64,
    #[serde(rename = "Reorder Level", deserialize_with = "lenient::count")]
    pub reorder_level: i64,
    #[serde(rename = "Supplier", default, deserialize_with = "lenient::text")]
    pub supplier: String,
}

/// Everything the procurement agent reads up front.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProcurementData {
    pub purchase_orders: Vec<PurchaseOrder>,
    pub budgets: Vec<Budget>,
    pub spend: Vec<Spend>,
    pub inventory: Vec<InventoryItem>,
}

//
// ================= Budget =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BudgetStatus {
    Within,
    Exceeded,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BudgetCheck {
    pub item: String,
    pub category: String,
    pub qty: f64,
    pub price: f64,
    pub cost: f64,
    pub remaining_budget: f64,
    pub status: BudgetStatus,
}

/// Check every PO against its category's remaining budget.
///
/// Remaining budget is `budget - spent` for the category and is not reduced
/// by earlier POs in the same batch.
pub fn check_budgets(
    orders: &[PurchaseOrder],
    budgets: &[Budget],
    spend: &[Spend],
    batch_size: usize,
) -> Vec<BudgetCheck> {
    let budget_map: HashMap<&str, f64> = budgets
        .iter()
        .map(|b| (b.category.as_str(), b.amount))
        .collect();

    let mut spend_map: HashMap<&str, f64> = HashMap::new();
    for s in spend {
        *spend_map.entry(s.category.as_str()).or_insert(0.0) += s.amount;
    }

    let mut results = Vec::with_capacity(orders.len());
    for batch in orders.chunks(batch_size.max(1)) {
        for po in batch {
            let cost = po.cost();
            let remaining = budget_map.get(po.category.as_str()).copied().unwrap_or(0.0)
                - spend_map.get(po.category.as_str()).copied().unwrap_or(0.0);

            results.push(BudgetCheck {
                item: po.item.clone(),
                category: po.category.clone(),
                qty: po.qty,
                price: po.price,
                cost,
                remaining_budget: remaining,
                status: if cost <= remaining {
                    BudgetStatus::Within
                } else {
                    BudgetStatus::Exceeded
                },
            });
        }
    }
    results
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BudgetOverview {
    pub total: usize,
    pub within: usize,
    pub exceeded: usize,
    pub largest_overage: f64,
}

impl BudgetOverview {
    pub fn from_checks(checks: &[BudgetCheck]) -> Self {
        let exceeded: Vec<&BudgetCheck> = checks
            .iter()
            .filter(|c| c.status == BudgetStatus::Exceeded)
            .collect();

        Self {
            total: checks.len(),
            within: checks.len() - exceeded.len(),
            exceeded: exceeded.len(),
            largest_overage: exceeded
                .iter()
                .map(|c| c.cost - c.remaining_budget)
                .fold(0.0, f64::max),
        }
    }

    pub fn message(&self) -> String {
        format!(
            "Budget Overview: {} within, {} exceeded",
            self.within, self.exceeded
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryBudget {
    pub category: String,
    pub cost: f64,
    pub remaining_budget: f64,
}

/// Total PO cost per category next to the category's remaining budget.
pub fn budget_by_category(checks: &[BudgetCheck]) -> Vec<CategoryBudget> {
    let mut grouped: BTreeMap<&str, CategoryBudget> = BTreeMap::new();
    for check in checks {
        grouped
            .entry(check.category.as_str())
            .or_insert_with(|| CategoryBudget {
                category: check.category.clone(),
                cost: 0.0,
                remaining_budget: check.remaining_budget,
            })
            .cost += check.cost;
    }
    grouped.into_values().collect()
}

//
// ================= Inventory =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InventoryStatus {
    Sufficient,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryCheck {
    pub item: String,
    pub category: String,
    pub stock: i64,
    pub reorder_level: i64,
    pub status: InventoryStatus,
    pub supplier: String,
}

impl InventoryCheck {
    /// Stock below half of the reorder level.
    pub fn is_critical(&self) -> bool {
        (self.stock as f64) < self.reorder_level as f64 * 0.5
    }
}

pub fn check_inventory(items: &[InventoryItem], batch_size: usize) -> Vec<InventoryCheck> {
    items
        .chunks(batch_size.max(1))
        .flat_map(|batch| batch.iter())
        .map(|item| InventoryCheck {
            item: item.item.clone(),
            category: item.category.clone(),
            stock: item.current_stock,
            reorder_level: item.reorder_level,
            status: if item.current_stock > item.reorder_level {
                InventoryStatus::Sufficient
            } else {
                InventoryStatus::Low
            },
            supplier: item.supplier.clone(),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryOverview {
    pub total: usize,
    pub sufficient: usize,
    pub low: usize,
    pub critical: usize,
}

impl InventoryOverview {
    pub fn from_checks(checks: &[InventoryCheck]) -> Self {
        let low = checks
            .iter()
            .filter(|c| c.status == InventoryStatus::Low)
            .count();
        Self {
            total: checks.len(),
            sufficient: checks.len() - low,
            low,
            critical: checks.iter().filter(|c| c.is_critical()).count(),
        }
    }

    pub fn message(&self) -> String {
        format!(
            "Inventory Status: {} sufficient, {} low",
            self.sufficient, self.low
        )
    }
}

//
// ================= Approvals =================
//

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ApprovalResult {
    pub auto_approved: Vec<PurchaseOrder>,
    pub needs_approval: Vec<PurchaseOrder>,
}

impl ApprovalResult {
    pub fn pending_value(&self) -> f64 {
        self.needs_approval.iter().map(|po| po.cost()).sum()
    }

    /// Pending POs, most expensive first.
    pub fn top_pending(&self, n: usize) -> Vec<&PurchaseOrder> {
        let mut pending: Vec<&PurchaseOrder> = self.needs_approval.iter().collect();
        pending.sort_by(|a, b| b.cost().total_cmp(&a.cost()));
        pending.truncate(n);
        pending
    }

    pub fn summary(&self) -> String {
        let mut out = format!(
            "Approval Overview:\n{} POs auto-approved\n{} POs need review\n\nTop Items Requiring Approval:",
            self.auto_approved.len(),
            self.needs_approval.len()
        );
        for po in self.top_pending(3) {
            out.push_str(&format!("\n- {} (PKR {})", po.item, format_money(po.cost())));
        }
        out
    }
}

/// A PO is auto-approved iff the budget check for its (item, category) passed.
pub fn classify_approvals(orders: &[PurchaseOrder], checks: &[BudgetCheck]) -> ApprovalResult {
    let mut result = ApprovalResult::default();
    for po in orders {
        let within = checks
            .iter()
            .find(|c| c.item == po.item && c.category == po.category)
            .map(|c| c.status == BudgetStatus::Within)
            .unwrap_or(false);

        if within {
            result.auto_approved.push(po.clone());
        } else {
            result.needs_approval.push(po.clone());
        }
    }
    result
}

//
// ================= Report aggregates =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VendorStats {
    pub vendor: String,
    pub orders: usize,
    pub mean_price: f64,
    pub total_price: f64,
    pub total_qty: f64,
}

pub fn vendor_aggregates(orders: &[PurchaseOrder]) -> Vec<VendorStats> {
    let mut grouped: BTreeMap<&str, VendorStats> = BTreeMap::new();
    for po in orders {
        let entry = grouped.entry(po.vendor.as_str()).or_insert_with(|| VendorStats {
            vendor: po.vendor.clone(),
            orders: 0,
            mean_price: 0.0,
            total_price: 0.0,
            total_qty: 0.0,
        });
        entry.orders += 1;
        entry.total_price += po.price;
        entry.total_qty += po.qty;
    }

    grouped
        .into_values()
        .map(|mut stats| {
            stats.mean_price = stats.total_price / stats.orders as f64;
            stats
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryTrend {
    pub category: String,
    pub date: String,
    pub total_price: f64,
    pub total_qty: f64,
}

pub fn category_trends(orders: &[PurchaseOrder]) -> Vec<CategoryTrend> {
    let mut grouped: BTreeMap<(&str, &str), (f64, f64)> = BTreeMap::new();
    for po in orders {
        let entry = grouped
            .entry((po.category.as_str(), po.date.as_str()))
            .or_insert((0.0, 0.0));
        entry.0 += po.price;
        entry.1 += po.qty;
    }

    grouped
        .into_iter()
        .map(|((category, date), (price, qty))| CategoryTrend {
            category: category.to_string(),
            date: date.to_string(),
            total_price: price,
            total_qty: qty,
        })
        .collect()
}

/// Most recent `limit` POs by date (ISO dates sort lexically).
pub fn latest_orders(orders: &[PurchaseOrder], limit: usize) -> Vec<PurchaseOrder> {
    let mut sorted = orders.to_vec();
    sorted.sort_by(|a, b| b.date.cmp(&a.date));
    sorted.truncate(limit);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn po(item: &str, category: &str, qty: f64, price: f64, vendor: &str, date: &str) -> PurchaseOrder {
        PurchaseOrder {
            item: item.to_string(),
            category: category.to_string(),
            qty,
            price,
            vendor: vendor.to_string(),
            date: date.to_string(),
        }
    }

    fn budgets() -> Vec<Budget> {
        vec![
            Budget {
                category: "IT".to_string(),
                amount: 10_000.0,
            },
            Budget {
                category: "Office".to_string(),
                amount: 2_000.0,
            },
        ]
    }

    fn spend() -> Vec<Spend> {
        vec![
            Spend {
                category: "IT".to_string(),
                amount: 4_000.0,
            },
            Spend {
                category: "IT".to_string(),
                amount: 1_000.0,
            },
        ]
    }

    #[test]
    fn test_budget_check_uses_remaining_budget() {
        let orders = vec![
            po("Laptop", "IT", 2.0, 2_500.0, "Dell", "2025-05-01"),
            po("Server", "IT", 1.0, 6_000.0, "HP", "2025-05-03"),
            po("Chairs", "Office", 10.0, 150.0, "Ikea", "2025-05-02"),
            po("Coffee", "Pantry", 1.0, 10.0, "Local", "2025-05-02"),
        ];
        let checks = check_budgets(&orders, &budgets(), &spend(), 2);

        assert_eq!(checks.len(), 4);
        // 10k - 5k spent = 5k remaining; 5k cost is within (<=)
        assert_eq!(checks[0].remaining_budget, 5_000.0);
        assert_eq!(checks[0].status, BudgetStatus::Within);
        // not reduced by the laptop order
        assert_eq!(checks[1].remaining_budget, 5_000.0);
        assert_eq!(checks[1].status, BudgetStatus::Exceeded);
        assert_eq!(checks[2].status, BudgetStatus::Within);
        // unknown category has no budget
        assert_eq!(checks[3].status, BudgetStatus::Exceeded);

        let overview = BudgetOverview::from_checks(&checks);
        assert_eq!(overview.message(), "Budget Overview: 2 within, 2 exceeded");
        assert_eq!(overview.largest_overage, 1_000.0);
    }

    #[test]
    fn test_inventory_thresholds() {
        let items = vec![
            InventoryItem {
                item: "Paper".to_string(),
                category: "Office".to_string(),
                current_stock: 50,
                reorder_level: 20,
                supplier: "A".to_string(),
            },
            InventoryItem {
                item: "Toner".to_string(),
                category: "Office".to_string(),
                current_stock: 20,
                reorder_level: 20,
                supplier: "B".to_string(),
            },
            InventoryItem {
                item: "Cables".to_string(),
                category: "IT".to_string(),
                current_stock: 4,
                reorder_level: 10,
                supplier: "C".to_string(),
            },
        ];
        let checks = check_inventory(&items, 5);

        assert_eq!(checks[0].status, InventoryStatus::Sufficient);
        // equal to reorder level is low
        assert_eq!(checks[1].status, InventoryStatus::Low);
        assert!(!checks[1].is_critical());
        assert!(checks[2].is_critical());

        let overview = InventoryOverview::from_checks(&checks);
        assert_eq!(overview.sufficient, 1);
        assert_eq!(overview.low, 2);
        assert_eq!(overview.critical, 1);
    }

    #[test]
    fn test_approvals_follow_budget_checks() {
        let orders = vec![
            po("Laptop", "IT", 2.0, 2_500.0, "Dell", "2025-05-01"),
            po("Server", "IT", 1.0, 6_000.0, "HP", "2025-05-03"),
            po("Desk", "Office", 1.0, 900.0, "Ikea", "2025-05-04"),
        ];
        let checks = check_budgets(&orders[..2], &budgets(), &spend(), 5);
        let approvals = classify_approvals(&orders, &checks);

        assert_eq!(approvals.auto_approved.len(), 1);
        // desk has no budget check at all
        assert_eq!(approvals.needs_approval.len(), 2);
        assert_eq!(approvals.pending_value(), 6_900.0);

        let summary = approvals.summary();
        assert!(summary.contains("1 POs auto-approved"));
        assert!(summary.contains("- Server (PKR 6,000.00)"));
    }

    #[test]
    fn test_top_pending_limits_to_three() {
        let result = ApprovalResult {
            auto_approved: vec![],
            needs_approval: (1..=5)
                .map(|i| po(&format!("Item{}", i), "IT", 1.0, i as f64 * 100.0, "V", "2025-01-01"))
                .collect(),
        };
        let top: Vec<&str> = result.top_pending(3).iter().map(|p| p.item.as_str()).collect();
        assert_eq!(top, vec!["Item5", "Item4", "Item3"]);
    }

    #[test]
    fn test_aggregates() {
        let orders = vec![
            po("A", "IT", 2.0, 100.0, "Dell", "2025-05-01"),
            po("B", "IT", 1.0, 300.0, "Dell", "2025-05-01"),
            po("C", "Office", 5.0, 10.0, "Ikea", "2025-04-01"),
        ];

        let vendors = vendor_aggregates(&orders);
        assert_eq!(vendors[0].vendor, "Dell");
        assert_eq!(vendors[0].orders, 2);
        assert_eq!(vendors[0].mean_price, 200.0);

        let trends = category_trends(&orders);
        assert_eq!(trends.len(), 2);
        assert_eq!(trends[0].total_price, 400.0);

        let latest = latest_orders(&orders, 2);
        assert_eq!(latest.len(), 2);
        assert!(latest.iter().all(|p| p.date == "2025-05-01"));

        let by_category = budget_by_category(&check_budgets(&orders, &budgets(), &spend(), 5));
        assert_eq!(by_category[0].category, "IT");
        assert_eq!(by_category[0].cost, 500.0);
    }
}
