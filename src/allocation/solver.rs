//! Exact solver for the trade selection program
//!
//! Depth-first branch and bound over integer contract quantities.
//! Candidates are explored in density order (objective value per cent of
//! cost) with a fractional-relaxation upper bound for pruning, so the
//! search is exact and deterministic without a third-party LP dependency.

/// One selectable candidate, costs in integer cents
#[derive(Debug, Clone)]
pub(crate) struct Item {
    /// Index into the caller's candidate list
    pub source: usize,
    /// Symbol group id, items sharing an underlying share the id
    pub symbol_group: usize,
    /// Objective value contributed by one contract
    pub unit_value: f64,
    /// Cost of one contract in cents
    pub unit_cost: i64,
    /// Per-item quantity ceiling
    pub max_qty: u32,
}

impl Item {
    pub(crate) fn value_per_cent(&self) -> f64 {
        if self.unit_cost <= 0 {
            return 0.0;
        }
        self.unit_value / self.unit_cost as f64
    }
}

/// Solver output: quantity per item (parallel to the input slice)
#[derive(Debug, Clone)]
pub(crate) struct Solution {
    pub quantities: Vec<u32>,
    pub objective: f64,
    pub total_cost_cents: i64,
}

/// Constraint set shared by the whole search
struct Constraints {
    budget_cents: i64,
    symbol_cap_cents: i64,
    max_distinct: usize,
    symbol_groups: usize,
}

struct Search<'a> {
    items: &'a [Item],
    limits: &'a Constraints,
    current: Vec<u32>,
    symbol_spent: Vec<i64>,
    best: Solution,
}

const EPS: f64 = 1e-9;

/// Maximize `sum(unit_value_i * q_i)` subject to the budget, per-symbol
/// cap and distinct-trade count. Items must be pre-sorted by descending
/// `value_per_cent`; the first incumbent is then the greedy solution and
/// pruning bites early. Returns the all-zero solution when nothing fits.
pub(crate) fn solve(
    items: &[Item],
    budget_cents: i64,
    symbol_cap_cents: i64,
    max_distinct: usize,
) -> Solution {
    let symbol_groups = items
        .iter()
        .map(|i| i.symbol_group + 1)
        .max()
        .unwrap_or(0);
    let limits = Constraints {
        budget_cents: budget_cents.max(0),
        symbol_cap_cents: symbol_cap_cents.max(0),
        max_distinct,
        symbol_groups,
    };

    let mut search = Search {
        items,
        limits: &limits,
        current: vec![0; items.len()],
        symbol_spent: vec![0; symbol_groups],
        best: Solution {
            quantities: vec![0; items.len()],
            objective: 0.0,
            total_cost_cents: 0,
        },
    };
    search.descend(0, 0.0, 0, 0);
    search.best
}

impl Search<'_> {
    /// Upper bound for items `from..` with `budget_left` cents: fill the
    /// budget in density order, last item taken fractionally. Ignoring the
    /// distinct-count and cross-item symbol interaction only loosens the
    /// bound, never undercuts it.
    fn fractional_bound(&self, from: usize, budget_left: i64) -> f64 {
        let mut bound = 0.0;
        let mut left = budget_left;
        for item in &self.items[from..] {
            if left <= 0 {
                break;
            }
            if item.unit_cost <= 0 || item.max_qty == 0 {
                continue;
            }
            let spend_cap = item.unit_cost * item.max_qty as i64;
            let spend = spend_cap.min(left);
            bound += item.value_per_cent() * spend as f64;
            left -= spend;
        }
        bound
    }

    fn descend(&mut self, idx: usize, value: f64, spent: i64, distinct: usize) {
        if idx == self.items.len() {
            if value > self.best.objective + EPS {
                self.best = Solution {
                    quantities: self.current.clone(),
                    objective: value,
                    total_cost_cents: spent,
                };
            }
            return;
        }

        let budget_left = self.limits.budget_cents - spent;
        if value + self.fractional_bound(idx, budget_left) <= self.best.objective + EPS {
            return;
        }

        let item = &self.items[idx];
        let group = item.symbol_group;
        debug_assert!(group < self.limits.symbol_groups);

        let mut qty_cap = item.max_qty as i64;
        if item.unit_cost > 0 {
            qty_cap = qty_cap
                .min(budget_left / item.unit_cost)
                .min((self.limits.symbol_cap_cents - self.symbol_spent[group]) / item.unit_cost);
        }
        if distinct >= self.limits.max_distinct {
            qty_cap = 0;
        }
        let qty_cap = qty_cap.max(0) as u32;

        // Greedy-first: highest quantity of the densest remaining item
        for qty in (0..=qty_cap).rev() {
            let cost = item.unit_cost * qty as i64;
            self.current[idx] = qty;
            self.symbol_spent[group] += cost;
            self.descend(
                idx + 1,
                value + item.unit_value * qty as f64,
                spent + cost,
                distinct + usize::from(qty > 0),
            );
            self.symbol_spent[group] -= cost;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(source: usize, group: usize, unit_value: f64, unit_cost: i64, max_qty: u32) -> Item {
        Item {
            source,
            symbol_group: group,
            unit_value,
            unit_cost,
            max_qty,
        }
    }

    fn sort_by_density(items: &mut [Item]) {
        items.sort_by(|a, b| {
            b.value_per_cent()
                .total_cmp(&a.value_per_cent())
                .then(a.symbol_group.cmp(&b.symbol_group))
        });
    }

    #[test]
    fn empty_input_yields_zero_solution() {
        let solution = solve(&[], 100_000, 50_000, 5);
        assert!(solution.quantities.is_empty());
        assert_eq!(solution.objective, 0.0);
        assert_eq!(solution.total_cost_cents, 0);
    }

    #[test]
    fn single_item_fills_to_budget() {
        let items = vec![item(0, 0, 1.0, 10_000, 10)];
        let solution = solve(&items, 45_000, 100_000, 5);
        assert_eq!(solution.quantities, vec![4]);
        assert_eq!(solution.total_cost_cents, 40_000);
    }

    #[test]
    fn symbol_cap_binds_before_budget() {
        let items = vec![item(0, 0, 1.0, 10_000, 10)];
        let solution = solve(&items, 100_000, 25_000, 5);
        assert_eq!(solution.quantities, vec![2]);
    }

    #[test]
    fn quantity_ceiling_binds_when_budget_is_loose() {
        let items = vec![item(0, 0, 1.0, 1_000, 10)];
        let solution = solve(&items, 1_000_000, 1_000_000, 5);
        assert_eq!(solution.quantities, vec![10]);
    }

    #[test]
    fn distinct_limit_keeps_only_best_items() {
        let mut items = vec![
            item(0, 0, 5.0, 10_000, 10),
            item(1, 1, 4.0, 10_000, 10),
            item(2, 2, 3.0, 10_000, 10),
        ];
        sort_by_density(&mut items);
        let solution = solve(&items, 1_000_000, 20_000, 2);

        let chosen: Vec<usize> = items
            .iter()
            .zip(&solution.quantities)
            .filter(|(_, q)| **q > 0)
            .map(|(i, _)| i.source)
            .collect();
        assert_eq!(chosen, vec![0, 1]);
    }

    #[test]
    fn prefers_dense_combination_over_greedy_single() {
        // One expensive high-value item vs two cheap ones that together
        // beat it inside the budget
        let mut items = vec![
            item(0, 0, 10.0, 50_000, 1),
            item(1, 1, 6.0, 25_000, 1),
            item(2, 2, 6.0, 25_000, 1),
        ];
        sort_by_density(&mut items);
        let solution = solve(&items, 50_000, 50_000, 5);
        assert!((solution.objective - 12.0).abs() < 1e-9);
        assert_eq!(solution.total_cost_cents, 50_000);
    }

    #[test]
    fn shared_symbol_group_shares_the_cap() {
        let mut items = vec![item(0, 0, 2.0, 10_000, 10), item(1, 0, 1.9, 10_000, 10)];
        sort_by_density(&mut items);
        let solution = solve(&items, 1_000_000, 30_000, 5);

        let spent: i64 = items
            .iter()
            .zip(&solution.quantities)
            .map(|(i, q)| i.unit_cost * *q as i64)
            .sum();
        assert!(spent <= 30_000);
        assert_eq!(spent, 30_000);
    }

    #[test]
    fn zero_budget_selects_nothing() {
        let items = vec![item(0, 0, 5.0, 100, 10)];
        let solution = solve(&items, 0, 0, 5);
        assert_eq!(solution.quantities, vec![0]);
        assert_eq!(solution.total_cost_cents, 0);
    }

    #[test]
    fn solver_is_deterministic() {
        let mut items = vec![
            item(0, 0, 3.3, 15_000, 10),
            item(1, 1, 3.3, 15_000, 10),
            item(2, 2, 2.1, 9_000, 10),
        ];
        sort_by_density(&mut items);
        let a = solve(&items, 60_000, 30_000, 5);
        let b = solve(&items, 60_000, 30_000, 5);
        assert_eq!(a.quantities, b.quantities);
        assert_eq!(a.objective.to_bits(), b.objective.to_bits());
    }
}
