use criterion::{Criterion, black_box, criterion_group, criterion_main};
use qi_core::{CaseSet, Chart, Graph, ParameterSet, propagate, simulate};

fn bench_propagate(c: &mut Criterion) {
    let params = ParameterSet::default();
    let chart = Chart::parse(&["GengShen", "JiaYin", "WuChen", "GuiHai"])
        .unwrap()
        .with_decade("YiMao".parse().unwrap())
        .with_year("BingWu".parse().unwrap());
    let graph = Graph::build(&chart, &params);

    c.bench_function("graph_build", |b| {
        b.iter(|| Graph::build(black_box(&chart), &params))
    });
    c.bench_function("propagate_200", |b| {
        b.iter(|| propagate(black_box(&graph), &params, 200))
    });
    c.bench_function("simulate", |b| {
        b.iter(|| simulate(black_box(&chart), &params, 200))
    });
}

fn bench_case_set(c: &mut Criterion) {
    let json = r#"{ "cases": [
        { "name": "a", "pillars": ["JiaYin", "YiMao", "JiaYin", "YiHai"], "label": { "classification": "dominant_support" } },
        { "name": "b", "pillars": ["GengShen", "JiaYin", "WuChen", "GuiHai"], "label": { "classification": "balanced" } },
        { "name": "c", "pillars": ["GengZi", "JiaWu", "GengYou", "BingWu"], "label": { "classification": "dominant_opposition" } },
        { "name": "d", "pillars": ["WuChen", "JiXu", "WuChou", "JiWei"], "label": { "classification": "dominant_support" } }
    ] }"#;
    let cases = CaseSet::from_json(json).unwrap();
    let params = ParameterSet::default();
    c.bench_function("case_set_report", |b| b.iter(|| cases.report(black_box(&params))));
}

criterion_group!(benches, bench_propagate, bench_case_set);
criterion_main!(benches);
