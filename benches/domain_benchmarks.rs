use criterion::{Criterion, criterion_group, criterion_main};
use loyalty_ledger::domain::{WithdrawRequest, luhn_valid};
use rust_decimal::Decimal;
use std::hint::black_box;
use validator::Validate;

fn bench_luhn(c: &mut Criterion) {
    c.bench_function("luhn_valid_short", |b| {
        b.iter(|| luhn_valid(black_box("79927398713")))
    });

    c.bench_function("luhn_valid_card_length", |b| {
        b.iter(|| luhn_valid(black_box("4561261212345467")))
    });
}

fn bench_validation(c: &mut Criterion) {
    let request = WithdrawRequest {
        order: "2377225624".to_string(),
        sum: Decimal::new(75150, 2),
    };

    c.bench_function("validate_withdraw_request", |b| {
        b.iter(|| {
            let _ = black_box(&request).validate();
        })
    });
}

criterion_group!(benches, bench_luhn, bench_validation);
criterion_main!(benches);
