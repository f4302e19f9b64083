//! Tests for trade selection and exit parameter derivation

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use optbot::allocation::{allocate, exit_parameters, AllocationRequest};
    use optbot::types::{
        CandidateTrade, ExpirationIvStats, MarketRegime, OptionContract, OptionRight,
        ScoreBreakdown, ScoredContract, SelectedTrade,
    };
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn make_candidate(symbol: &str, premium: f64, score: f64) -> CandidateTrade {
        let expiration = NaiveDate::from_ymd_opt(2025, 5, 16).unwrap();
        let contract = OptionContract {
            contract_symbol: format!("{symbol}  250516C00100000"),
            underlying: symbol.to_string(),
            right: OptionRight::Call,
            strike: 100.0,
            bid: Some(premium),
            ask: Some(premium),
            last: Some(premium),
            open_interest: Some(1800.0),
            volume: Some(450.0),
            implied_volatility: Some(40.0),
            delta: Some(0.5),
            gamma: None,
            theta: Some(-0.04),
            vega: None,
            expiration,
        };
        let stats = Arc::new(ExpirationIvStats {
            expiration,
            min: 30.0,
            max: 50.0,
            mean: 40.0,
            std: 8.0,
            count: 9,
        });
        CandidateTrade::new(
            symbol,
            ScoredContract {
                contract,
                score,
                breakdown: ScoreBreakdown::default(),
                iv_stats: stats,
            },
        )
    }

    fn spent_cents(trades: &[SelectedTrade]) -> i64 {
        trades.iter().map(SelectedTrade::cost_cents).sum()
    }

    fn spent_cents_by_symbol(trades: &[SelectedTrade]) -> BTreeMap<String, i64> {
        let mut by_symbol = BTreeMap::new();
        for trade in trades {
            *by_symbol.entry(trade.symbol.clone()).or_insert(0) += trade.cost_cents();
        }
        by_symbol
    }

    // ============================================================================
    // Portfolio selection
    // ============================================================================

    #[test]
    fn test_budget_and_symbol_caps_shape_the_portfolio() {
        // Cash 1000: budget 900, per-symbol cap 500. AAPL fits 3 contracts
        // at its cap, TSLA 2 at its cap, and one MSFT contract already
        // overshoots the symbol cap.
        let request = AllocationRequest::new(
            vec![
                make_candidate("AAPL", 1.50, 7.5),
                make_candidate("MSFT", 6.85, 8.2),
                make_candidate("TSLA", 2.00, 8.0),
            ],
            1000.0,
            MarketRegime::Normal,
        );
        let result = allocate(&request);

        assert_eq!(result.budget, 900.0);
        assert_eq!(result.selected.len(), 2);
        assert_eq!(result.selected[0].symbol, "AAPL");
        assert_eq!(result.selected[0].contracts_to_buy, 3);
        assert_eq!(result.selected[0].total_cost, 450.0);
        assert_eq!(result.selected[1].symbol, "TSLA");
        assert_eq!(result.selected[1].contracts_to_buy, 2);
        assert_eq!(result.selected[1].total_cost, 400.0);
        assert_eq!(result.total_premium_used, 850.0);
        assert!((result.objective - 23.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_contract_above_symbol_cap_is_unbuyable() {
        // One MSFT contract costs 685, under the 900 budget but over the
        // 500 per-symbol cap, so nothing can be bought at all.
        let result = allocate(&AllocationRequest::new(
            vec![make_candidate("MSFT", 6.85, 8.2)],
            1000.0,
            MarketRegime::Normal,
        ));

        assert!(result.selected.is_empty());
        assert_eq!(result.total_premium_used, 0.0);
    }

    #[test]
    fn test_distinct_trade_cap_drops_the_weakest_symbol() {
        let request = AllocationRequest::new(
            vec![
                make_candidate("AAPL", 1.0, 5.9),
                make_candidate("AMD", 1.0, 5.8),
                make_candidate("MSFT", 1.0, 5.7),
                make_candidate("NVDA", 1.0, 5.6),
                make_candidate("TSLA", 1.0, 5.5),
                make_candidate("SOFI", 1.0, 5.4),
            ],
            10_000.0,
            MarketRegime::Normal,
        );
        let result = allocate(&request);

        let symbols: Vec<&str> = result.selected.iter().map(|t| t.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAPL", "AMD", "MSFT", "NVDA", "TSLA"]);
        for trade in &result.selected {
            assert_eq!(trade.contracts_to_buy, 10);
        }
    }

    // ============================================================================
    // Constraint safety
    // ============================================================================

    fn mixed_book() -> Vec<CandidateTrade> {
        vec![
            make_candidate("AAPL", 0.45, 4.2),
            make_candidate("AMD", 1.20, 7.1),
            make_candidate("MSFT", 3.40, 8.9),
            make_candidate("NVDA", 0.90, 5.5),
            make_candidate("PLTR", 2.25, 6.4),
            make_candidate("NFLX", 5.10, 9.3),
            make_candidate("SOFI", 0.30, 3.1),
            make_candidate("TSLA", 1.75, 7.8),
        ]
    }

    #[test]
    fn test_caps_hold_on_a_mixed_book() {
        let request = AllocationRequest::new(mixed_book(), 2500.0, MarketRegime::Normal);
        let result = allocate(&request);

        assert!(!result.selected.is_empty());
        assert!(result.selected.len() <= request.max_distinct_trades);

        let spent = spent_cents(&result.selected);
        assert!(spent <= (2500.0 * 0.9 * 100.0) as i64);
        assert_eq!((result.total_premium_used * 100.0).round() as i64, spent);

        for (_, symbol_spent) in spent_cents_by_symbol(&result.selected) {
            assert!(symbol_spent <= (2500.0 * 0.5 * 100.0) as i64);
        }
        for trade in &result.selected {
            assert!(trade.contracts_to_buy >= 1);
            assert!(trade.contracts_to_buy <= request.max_contracts_per_trade);
        }
    }

    #[test]
    fn test_tightened_limits_are_respected() {
        let mut request = AllocationRequest::new(mixed_book(), 2500.0, MarketRegime::Normal);
        request.max_distinct_trades = 3;
        request.max_symbol_fraction = 0.2;
        request.max_contracts_per_trade = 4;
        let result = allocate(&request);

        assert!(!result.selected.is_empty());
        assert!(result.selected.len() <= 3);
        assert!(spent_cents(&result.selected) <= (2500.0 * 0.9 * 100.0) as i64);
        for (_, symbol_spent) in spent_cents_by_symbol(&result.selected) {
            assert!(symbol_spent <= (2500.0 * 0.2 * 100.0) as i64);
        }
        for trade in &result.selected {
            assert!(trade.contracts_to_buy <= 4);
        }
    }

    // ============================================================================
    // Exit levels
    // ============================================================================

    #[test]
    fn test_selected_trades_carry_regime_scaled_exits() {
        for regime in [MarketRegime::Normal, MarketRegime::HighlyVolatile] {
            let result = allocate(&AllocationRequest::new(
                vec![make_candidate("TSLA", 2.0, 8.0)],
                1000.0,
                regime,
            ));
            let trade = &result.selected[0];
            let exits = exit_parameters(2.0, 40.0, regime);

            assert_eq!(trade.exit_premium, exits.exit_premium);
            assert_eq!(trade.stop_loss, exits.stop_loss);
            assert_eq!(trade.stop_price, exits.stop_price);
        }

        let normal = exit_parameters(2.0, 40.0, MarketRegime::Normal);
        assert_eq!(normal.exit_premium, 2.80);
        assert_eq!(normal.stop_loss, 0.90);
        assert_eq!(normal.stop_price, 1.00);

        let hot = exit_parameters(2.0, 40.0, MarketRegime::HighlyVolatile);
        assert_eq!(hot.exit_premium, 3.36);
        assert_eq!(hot.stop_loss, 0.81);
        assert_eq!(hot.stop_price, 0.91);
    }

    #[test]
    fn test_profit_and_loss_totals_scale_with_quantity() {
        // TSLA at 2.00 under cash 1000 caps at 2 contracts via the symbol
        // limit. Exit 2.80 and stop 0.90 give 0.80 profit and 1.10 loss per
        // share, times 100 shares times 2 contracts.
        let result = allocate(&AllocationRequest::new(
            vec![make_candidate("TSLA", 2.0, 8.0)],
            1000.0,
            MarketRegime::Normal,
        ));
        let trade = &result.selected[0];

        assert_eq!(trade.contracts_to_buy, 2);
        assert_eq!(trade.total_cost, 400.0);
        assert_eq!(trade.total_profit, 160.0);
        assert_eq!(trade.total_loss, 220.0);
        assert_eq!(result.total_premium_used, 400.0);
    }

    // ============================================================================
    // Trade identity
    // ============================================================================

    #[test]
    fn test_each_selected_trade_gets_its_own_id() {
        let result = allocate(&AllocationRequest::new(
            vec![
                make_candidate("AAPL", 1.50, 7.5),
                make_candidate("TSLA", 2.00, 8.0),
            ],
            1000.0,
            MarketRegime::Normal,
        ));

        assert_eq!(result.selected.len(), 2);
        assert_ne!(result.selected[0].trade_id, result.selected[1].trade_id);
    }
}
