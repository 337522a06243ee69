#![cfg(feature = "inmem-store")]

mod common;

use std::sync::Arc;

use common::user;
use startorigin::feed::{Feed, ProblemSource, ProjectSource, PAGE_SIZE};
use startorigin::models::*;
use startorigin::repo::inmem::InMemRepo;
use startorigin::repo::{ContentRepo, Repo};

async fn seed(repo: &InMemRepo, n: usize) -> Id {
    let author = user(repo, "author").await;
    for i in 0..n {
        let category = if i % 2 == 0 { "tech" } else { "health" };
        repo.create_problem(
            author.id,
            NewProblem {
                title: format!("Problem {i}"),
                description: if i == 3 { "Bike lanes are missing".into() } else { format!("about {i}") },
                category: category.into(),
            },
        )
        .await
        .unwrap();
    }
    author.id
}

fn source(repo: &InMemRepo) -> ProblemSource {
    let r: Arc<dyn Repo> = Arc::new(repo.clone());
    ProblemSource(r)
}

#[tokio::test]
async fn pages_until_exhausted_then_stops_asking() {
    let repo = InMemRepo::new();
    seed(&repo, 10).await;
    let mut feed = Feed::new(source(&repo));

    feed.refresh().await.unwrap();
    assert_eq!(feed.items().len(), PAGE_SIZE);
    assert_eq!(feed.total(), Some(10));
    assert!(feed.has_more());

    assert_eq!(feed.load_more().await.unwrap(), 4);
    assert_eq!(feed.load_more().await.unwrap(), 2);
    assert!(!feed.has_more());
    assert_eq!(feed.requests(), 3);

    assert_eq!(feed.load_more().await.unwrap(), 0);
    assert_eq!(feed.requests(), 3);

    // no duplicates across pages
    let mut ids: Vec<Id> = feed.items().iter().map(|p| p.id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 10);
}

#[tokio::test]
async fn changing_filters_restarts_from_the_first_page() {
    let repo = InMemRepo::new();
    seed(&repo, 10).await;
    let mut feed = Feed::new(source(&repo));
    feed.refresh().await.unwrap();
    feed.load_more().await.unwrap();

    feed.set_query(FeedQuery { category: Some("health".into()), ..Default::default() }).await.unwrap();
    assert_eq!(feed.total(), Some(5));
    assert_eq!(feed.items().len(), 4);
    assert!(feed.items().iter().all(|p| p.category == "health"));

    feed.set_query(FeedQuery { search: Some("bike LANES".into()), ..Default::default() }).await.unwrap();
    assert_eq!(feed.items().len(), 1);
    assert_eq!(feed.items()[0].title, "Problem 3");
    assert!(!feed.has_more());

    feed.set_query(FeedQuery { category: Some("all".into()), search: Some("  ".into()), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(feed.total(), Some(10));
}

#[tokio::test]
async fn popular_sort_orders_by_upvotes() {
    let repo = InMemRepo::new();
    seed(&repo, 3).await;
    let all = repo.list_problems(&FeedQuery::default(), 0, 10).await.unwrap().items;
    let oldest = all.last().unwrap().id;
    repo.set_problem_upvotes(oldest, 7).await.unwrap();

    let mut feed = Feed::new(source(&repo));
    feed.set_query(FeedQuery { sort: Sort::Popular, ..Default::default() }).await.unwrap();
    assert_eq!(feed.items()[0].id, oldest);
    assert_eq!(feed.items()[0].upvotes, 7);
}

#[tokio::test]
async fn empty_feed_is_exhausted_after_one_request() {
    let repo = InMemRepo::new();
    let author = user(&repo, "owner").await;
    let r: Arc<dyn Repo> = Arc::new(repo.clone());
    let mut feed = Feed::new(ProjectSource(r));

    feed.refresh().await.unwrap();
    assert!(feed.items().is_empty());
    assert!(!feed.has_more());

    repo.create_project(
        author.id,
        NewProject { title: "Map".into(), description: "Bike map".into(), category: "tech".into(), url: None },
    )
    .await
    .unwrap();
    feed.refresh().await.unwrap();
    assert_eq!(feed.items().len(), 1);
    assert_eq!(feed.requests(), 2);
}

#[tokio::test]
async fn exactly_one_full_page_needs_no_second_request() {
    let repo = InMemRepo::new();
    seed(&repo, PAGE_SIZE).await;
    let mut feed = Feed::new(source(&repo));

    feed.refresh().await.unwrap();
    assert_eq!(feed.items().len(), 4);
    assert!(!feed.has_more());
    assert_eq!(feed.load_more().await.unwrap(), 0);
    assert_eq!(feed.requests(), 1);
}
