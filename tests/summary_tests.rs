//! Summary (sweep) transactions across the addresses of an account.

mod util;

use hd_assets_wallet::core::{
    Address, SmartContract, SummaryRequest, TxStatus, WalletError,
};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use util::{setup, wallet_with_account, TestEnv, NS, PASSWORD, RECEIVER};

/// Wallet with three addresses funded 50, 5 and 200.
async fn funded_account(env: &TestEnv) -> (String, String, Vec<Address>) {
    let (wallet, account, first) = wallet_with_account(env).await;
    let mut addresses = vec![first];
    addresses.extend(
        env.manager
            .create_address(NS, &wallet.wallet_id, &account.account_id, 2)
            .await
            .unwrap(),
    );
    for (address, balance) in addresses.iter().zip([50, 5, 200]) {
        env.ledger.set_balance(&address.address, Decimal::from(balance));
    }
    (wallet.wallet_id, account.account_id, addresses)
}

#[tokio::test]
async fn test_sweep_builds_one_transaction_per_qualifying_address() {
    let env = setup();
    let (wallet_id, account_id, addresses) = funded_account(&env).await;

    let request = SummaryRequest::new(RECEIVER).thresholds("10", "1");
    let txs = env
        .manager
        .create_summary_transaction(NS, &wallet_id, &account_id, &request)
        .await
        .unwrap();

    let summary: Vec<(String, Decimal)> = txs
        .iter()
        .map(|tx| (tx.from[0].clone(), tx.total_amount()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (addresses[0].address.clone(), Decimal::from(49)),
            (addresses[2].address.clone(), Decimal::from(199)),
        ]
    );
    for tx in &txs {
        assert_eq!(tx.status, TxStatus::Built);
        assert_eq!(tx.to[0].address, RECEIVER);
    }

    let mut txs = txs;
    for tx in txs.iter_mut() {
        env.manager.sign_transaction(NS, &wallet_id, tx, PASSWORD).await.unwrap();
        env.manager.verify_transaction(NS, &wallet_id, tx).await.unwrap();
        env.manager.submit_transaction(NS, &wallet_id, tx).await.unwrap();
    }
    assert_eq!(env.ledger.balance_of(RECEIVER), Decimal::from(248));
    assert_eq!(env.ledger.balance_of(&addresses[0].address), Decimal::ONE);
    assert_eq!(env.ledger.balance_of(&addresses[1].address), Decimal::from(5));
    assert_eq!(env.ledger.balance_of(&addresses[2].address), Decimal::ONE);
}

#[tokio::test]
async fn test_empty_thresholds_sweep_everything() {
    let env = setup();
    let (wallet_id, account_id, _) = funded_account(&env).await;

    let txs = env
        .manager
        .create_summary_transaction(NS, &wallet_id, &account_id, &SummaryRequest::new(RECEIVER))
        .await
        .unwrap();
    let amounts: Vec<Decimal> = txs.iter().map(|tx| tx.total_amount()).collect();
    assert_eq!(amounts, vec![Decimal::from(50), Decimal::from(5), Decimal::from(200)]);
}

#[tokio::test]
async fn test_summary_address_inside_account_is_skipped() {
    let env = setup();
    let (wallet_id, account_id, addresses) = funded_account(&env).await;

    let request = SummaryRequest::new(&addresses[2].address).thresholds("10", "1");
    let txs = env
        .manager
        .create_summary_transaction(NS, &wallet_id, &account_id, &request)
        .await
        .unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].from, vec![addresses[0].address.clone()]);
    assert_eq!(txs[0].to[0].address, addresses[2].address);
}

#[tokio::test]
async fn test_scan_range_limits_candidates() {
    let env = setup();
    let (wallet_id, account_id, addresses) = funded_account(&env).await;

    let request = SummaryRequest::new(RECEIVER).range(1, 2);
    let txs = env
        .manager
        .create_summary_transaction(NS, &wallet_id, &account_id, &request)
        .await
        .unwrap();
    let sources: Vec<String> = txs.iter().map(|tx| tx.from[0].clone()).collect();
    assert_eq!(sources, vec![addresses[1].address.clone(), addresses[2].address.clone()]);

    let request = SummaryRequest::new(RECEIVER).range(0, 1).thresholds("100", "");
    let txs = env
        .manager
        .create_summary_transaction(NS, &wallet_id, &account_id, &request)
        .await
        .unwrap();
    assert!(txs.is_empty());
}

#[tokio::test]
async fn test_retained_balance_above_balance_is_not_swept() {
    let env = setup();
    let (wallet_id, account_id, addresses) = funded_account(&env).await;

    let request = SummaryRequest::new(RECEIVER).thresholds("", "60");
    let txs = env
        .manager
        .create_summary_transaction(NS, &wallet_id, &account_id, &request)
        .await
        .unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].from, vec![addresses[2].address.clone()]);
    assert_eq!(txs[0].total_amount(), Decimal::from(140));
}

#[tokio::test]
async fn test_invalid_summary_requests() {
    let env = setup();
    let (wallet_id, account_id, _) = funded_account(&env).await;

    let err = env
        .manager
        .create_summary_transaction(NS, &wallet_id, &account_id, &SummaryRequest::new("nowhere"))
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::InvalidRecipient(_)));

    let request = SummaryRequest::new(RECEIVER).thresholds("-1", "");
    let err = env
        .manager
        .create_summary_transaction(NS, &wallet_id, &account_id, &request)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::InvalidAmount(_)));

    let request = SummaryRequest::new(RECEIVER).range(-1, 5);
    let err = env
        .manager
        .create_summary_transaction(NS, &wallet_id, &account_id, &request)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::Validation(_)));
}

#[tokio::test]
async fn test_token_sweep_reports_per_address_errors() {
    let env = setup();
    let (wallet_id, account_id, addresses) = funded_account(&env).await;
    let contract = SmartContract {
        address: "0x00000000000000000000000000000000000000c0".into(),
        symbol: util::SYMBOL.into(),
        name: "Test Token".into(),
        token: "TT".into(),
        decimals: 6,
    };
    for (address, balance) in addresses.iter().zip([50, 5, 200]) {
        env.ledger
            .set_token_balance(&contract.address, &address.address, Decimal::from(balance));
    }
    // Only the first address can pay the native fee.
    env.ledger.set_balance(&addresses[0].address, Decimal::ONE);
    env.ledger.set_balance(&addresses[2].address, Decimal::ZERO);

    let request = SummaryRequest::new(RECEIVER)
        .thresholds("10", "1")
        .fee_rate("1")
        .contract(&contract);
    let results = env
        .manager
        .create_summary_transaction_with_error(NS, &wallet_id, &account_id, &request)
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].address, addresses[0].address);
    assert_eq!(results[0].amount, Decimal::from(49));
    assert!(results[0].result.is_ok());
    assert_eq!(results[1].address, addresses[2].address);
    assert_eq!(results[1].amount, Decimal::from(199));
    assert!(matches!(results[1].result, Err(WalletError::InsufficientBalance(_))));

    // The successful sweep is persisted, the failed one is not.
    let built = env
        .manager
        .list_transactions(NS, &wallet_id, &account_id, Some(TxStatus::Built))
        .await
        .unwrap();
    assert_eq!(built.len(), 1);
    assert_eq!(built[0].contract.as_ref(), Some(&contract));

    let plain = env
        .manager
        .create_summary_transaction(NS, &wallet_id, &account_id, &request)
        .await
        .unwrap();
    assert_eq!(plain.len(), 1);
}
