//! Performance benchmarks for the bouncer core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ircbnc_core::split::split_body;
use ircbnc_core::*;
use std::sync::Arc;

fn benchmark_line_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_parsing");

    let lines = vec![
        ":alice!user@host PRIVMSG #channel :Hello world",
        ":server.example.com 353 alice = #rust :@carol +bob dave erin",
        ":server.example.com 001 alice :Welcome to the Internet Relay Network",
        ":bob!b@host MODE #rust +ov carol dave",
        "PING :server.example.com",
    ];

    for line in lines {
        group.bench_with_input(BenchmarkId::from_parameter(line), line, |b, line| {
            b.iter(|| Line::parse(black_box(line)))
        });
    }

    group.finish();
}

fn benchmark_userlist(c: &mut Criterion) {
    let mut group = c.benchmark_group("userlist");

    for size in [50usize, 500, 5000] {
        let names: Vec<String> = (0..size)
            .map(|i| match i % 10 {
                0 => format!("@op{}", i),
                1 | 2 => format!("+voice{}", i),
                _ => format!("user{}", i),
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("merge", size), &names, |b, names| {
            b.iter(|| {
                let mut list = UserList::new();
                list.merge(black_box(names));
                list
            })
        });

        let list = UserList::from_names(&names);
        group.bench_with_input(BenchmarkId::new("sort", size), &list, |b, list| {
            b.iter(|| {
                let mut list = list.clone();
                list.sort();
                list
            })
        });
    }

    group.finish();
}

fn benchmark_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("split_body");

    let words = "lorem ipsum dolor sit amet consectetur adipiscing elit ".repeat(40);
    let unbroken = "x".repeat(2000);
    let multibyte = "żółć ".repeat(400);

    for (name, body) in [("words", &words), ("unbroken", &unbroken), ("multibyte", &multibyte)] {
        group.bench_with_input(BenchmarkId::from_parameter(name), body, |b, body| {
            b.iter(|| split_body(black_box(body), 400))
        });
    }

    group.finish();
}

fn benchmark_receive_message(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let context = BouncerContext::new(BouncerConfig::default()).with_store(Arc::new(MemoryStore::new()));
    let (user, mut updates) = User::new("bench", "", context);
    runtime.spawn(async move { while updates.recv().await.is_some() {} });
    let mut network = Config::default().users[0].networks[0].clone();
    network.name = "bench".to_string();
    let session = user.add_network(network).unwrap();
    let session = &session;

    c.bench_function("receive_message", |b| {
        b.to_async(&runtime).iter(|| async move {
            session
                .receive_message("#rust", "bob", MessageKind::Privmsg, black_box("hello there"))
                .await
                .unwrap()
        })
    });
}

criterion_group!(
    benches,
    benchmark_line_parsing,
    benchmark_userlist,
    benchmark_split,
    benchmark_receive_message
);
criterion_main!(benches);
