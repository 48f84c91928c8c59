//! Tests for the query builder
//!
//! Covers index filters and sorting, paging, connectors and the errors
//! reported for malformed builder chains.

use crate::db::DatabaseService;
use crate::models::{Record, RecordMeta, SchemaBuilder, Value};
use crate::services::{RecordError, Records};
use crate::RecordsConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Person {
    #[serde(skip)]
    meta: RecordMeta,
    name: String,
    age: Option<u32>,
}

impl Person {
    fn new(name: &str, age: u32) -> Self {
        Self {
            name: name.to_string(),
            age: Some(age),
            ..Default::default()
        }
    }
}

impl Record for Person {
    const SCHEMA_ID: &'static str = "test.Person";

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }

    fn describe(schema: &mut SchemaBuilder<Self>) {
        schema
            .index("name", |p: &Person| p.name.clone())
            .index("age", |p: &Person| p.age);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Household {
    #[serde(skip)]
    meta: RecordMeta,
    street: String,
}

impl Record for Household {
    const SCHEMA_ID: &'static str = "test.Household";

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut RecordMeta {
        &mut self.meta
    }
}

/// Helper to open a records session on a fresh database
async fn create_test_records() -> (Records, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = DatabaseService::new(temp_dir.path().join("test.db"))
        .await
        .unwrap();
    let records = Records::new(&db, RecordsConfig::default()).await.unwrap();
    (records, temp_dir)
}

/// Daddy (40), Mummy (30) and Baby (5), saved in that order
async fn create_family(records: &Records) -> (Person, Person, Person) {
    let mut daddy = Person::new("Daddy", 40);
    let mut mummy = Person::new("Mummy", 30);
    let mut baby = Person::new("Baby", 5);
    records
        .save([&mut daddy, &mut mummy, &mut baby])
        .await
        .unwrap();
    (daddy, mummy, baby)
}

fn names(people: &[Person]) -> Vec<&str> {
    people.iter().map(|p| p.name.as_str()).collect()
}

#[tokio::test]
async fn test_order_and_reverse_by_indexed_field() {
    let (records, _temp) = create_test_records().await;
    create_family(&records).await;

    let ascending = records
        .query::<Person>()
        .order_by_indexed_field("age")
        .get_list()
        .await
        .unwrap();
    assert_eq!(names(&ascending), vec!["Baby", "Mummy", "Daddy"]);

    let descending = records
        .query::<Person>()
        .reverse_by_indexed_field("age")
        .get_list()
        .await
        .unwrap();
    assert_eq!(names(&descending), vec!["Daddy", "Mummy", "Baby"]);
}

#[tokio::test]
async fn test_comparison_filters() {
    let (records, _temp) = create_test_records().await;
    let (_, mummy, _) = create_family(&records).await;

    let exact = records
        .query::<Person>()
        .index_equal_to("age", 30)
        .get_list()
        .await
        .unwrap();
    assert_eq!(names(&exact), vec!["Mummy"]);
    assert_eq!(exact[0].id(), mummy.id());

    let adults = records
        .query::<Person>()
        .index_greater_than_or_equal_to("age", 18)
        .order_by_insert()
        .get_list()
        .await
        .unwrap();
    assert_eq!(names(&adults), vec!["Daddy", "Mummy"]);

    let not_mummy = records
        .query::<Person>()
        .index_not_equal_to("name", "Mummy")
        .index_less_than("age", 41)
        .order_by_insert()
        .get_list()
        .await
        .unwrap();
    assert_eq!(names(&not_mummy), vec!["Daddy", "Baby"]);
}

#[tokio::test]
async fn test_in_and_like_filters() {
    let (records, _temp) = create_test_records().await;
    create_family(&records).await;

    let parents = records
        .query::<Person>()
        .index_in("age", [40, 30])
        .order_by_indexed_field("age")
        .get_list()
        .await
        .unwrap();
    assert_eq!(names(&parents), vec!["Mummy", "Daddy"]);

    let baby = records
        .query::<Person>()
        .index_not_in("name", ["Daddy", "Mummy"])
        .get_list()
        .await
        .unwrap();
    assert_eq!(names(&baby), vec!["Baby"]);

    let likes = records
        .query::<Person>()
        .index_like("name", ["D%", "B%"])
        .order_by_insert()
        .get_list()
        .await
        .unwrap();
    assert_eq!(names(&likes), vec!["Daddy", "Baby"]);

    let not_likes = records
        .query::<Person>()
        .index_not_like("name", ["D%", "B%"])
        .get_list()
        .await
        .unwrap();
    assert_eq!(names(&not_likes), vec!["Mummy"]);
}

#[tokio::test]
async fn test_paging_and_count() {
    let (records, _temp) = create_test_records().await;
    create_family(&records).await;

    let page = records
        .query::<Person>()
        .reverse_by_insert()
        .first_result(1)
        .max_results(1)
        .get_list()
        .await
        .unwrap();
    assert_eq!(names(&page), vec!["Mummy"]);

    let count = records
        .query::<Person>()
        .first_result(2)
        .max_results(1)
        .count()
        .await
        .unwrap();
    assert_eq!(count, 3);

    let first = records
        .query::<Person>()
        .order_by_indexed_field("age")
        .get_first()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.name, "Baby");
}

#[tokio::test]
async fn test_first_insertion_order_call_wins() {
    let (records, _temp) = create_test_records().await;
    create_family(&records).await;

    let people = records
        .query::<Person>()
        .order_by_insert()
        .reverse_by_insert()
        .get_list()
        .await
        .unwrap();
    assert_eq!(names(&people), vec!["Daddy", "Mummy", "Baby"]);
}

#[tokio::test]
async fn test_missing_index_value_sorts_first() {
    let (records, _temp) = create_test_records().await;
    create_family(&records).await;
    let mut unknown = Person {
        name: "Unknown".into(),
        ..Default::default()
    };
    records.save([&mut unknown]).await.unwrap();

    let people = records
        .query::<Person>()
        .order_by_indexed_field("age")
        .get_list()
        .await
        .unwrap();
    assert_eq!(names(&people), vec!["Unknown", "Baby", "Mummy", "Daddy"]);
}

#[tokio::test]
async fn test_find_applies_query_constraints() {
    let (records, _temp) = create_test_records().await;
    let (daddy, _, baby) = create_family(&records).await;

    let adult = records
        .query::<Person>()
        .index_greater_than("age", 18)
        .find(daddy.id().unwrap())
        .await
        .unwrap();
    assert_eq!(adult.map(|p| p.name), Some("Daddy".to_string()));

    let child = records
        .query::<Person>()
        .index_greater_than("age", 18)
        .find(baby.id().unwrap())
        .await
        .unwrap();
    assert!(child.is_none());
}

#[tokio::test]
async fn test_queries_are_scoped_to_record_type() {
    let (records, _temp) = create_test_records().await;
    create_family(&records).await;
    let mut home = Household {
        street: "Main Street".into(),
        ..Default::default()
    };
    records.save([&mut home]).await.unwrap();

    assert_eq!(records.query::<Person>().count().await.unwrap(), 3);
    assert_eq!(records.query::<Household>().count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_link_connectors() {
    let (records, _temp) = create_test_records().await;
    let (daddy, mummy, baby) = create_family(&records).await;
    let mut home = Household::default();
    let mut cottage = Household::default();
    records.save([&mut home, &mut cottage]).await.unwrap();

    records
        .link_with_attribute(&home, &[&daddy, &mummy, &baby], "resident")
        .await
        .unwrap();
    records.link(&cottage, &[&mummy]).await.unwrap();

    let residents = records
        .query::<Person>()
        .linking(&[&home])
        .order_by_insert()
        .get_list()
        .await
        .unwrap();
    assert_eq!(names(&residents), vec!["Daddy", "Mummy", "Baby"]);

    let both = records
        .query::<Person>()
        .linking(&[&home, &cottage])
        .get_list()
        .await
        .unwrap();
    assert_eq!(names(&both), vec!["Mummy"]);

    let either = records
        .query::<Person>()
        .linking_any(&[&home, &cottage])
        .count()
        .await
        .unwrap();
    assert_eq!(either, 3);

    let households = records
        .query::<Household>()
        .linking(&[&mummy])
        .count()
        .await
        .unwrap();
    assert_eq!(households, 2);
}

#[tokio::test]
async fn test_attribute_filter_and_sort() {
    let (records, _temp) = create_test_records().await;
    let (daddy, mummy, baby) = create_family(&records).await;
    let mut home = Household::default();
    records.save([&mut home]).await.unwrap();

    records
        .link_with_attribute(&home, &[&daddy], 3)
        .await
        .unwrap();
    records
        .link_with_attribute(&home, &[&mummy], 1)
        .await
        .unwrap();
    records
        .link_with_attribute(&home, &[&baby], 2)
        .await
        .unwrap();

    let ordered = records
        .query::<Person>()
        .linking(&[&home])
        .order_by_attribute()
        .get_list()
        .await
        .unwrap();
    assert_eq!(names(&ordered), vec!["Mummy", "Baby", "Daddy"]);

    let filtered = records
        .query::<Person>()
        .linking(&[&home])
        .attribute_greater_than(1)
        .reverse_by_attribute()
        .get_list()
        .await
        .unwrap();
    assert_eq!(names(&filtered), vec!["Daddy", "Baby"]);

    let selected = records
        .query::<Person>()
        .linking(&[&home])
        .attribute_in([Decimal::from(1), Decimal::from(3)])
        .count()
        .await
        .unwrap();
    assert_eq!(selected, 2);
}

#[tokio::test]
async fn test_hierarchy_connectors() {
    let (records, _temp) = create_test_records().await;
    let (daddy, mummy, baby) = create_family(&records).await;
    let mut grandpa = Person::new("Grandpa", 70);
    records.save([&mut grandpa]).await.unwrap();

    records.add_edge(&grandpa, &daddy).await.unwrap();
    records.add_children(&daddy, &[&baby]).await.unwrap();
    records.add_parents(&baby, &[&mummy]).await.unwrap();

    let children = records
        .query::<Person>()
        .child_of(&[&grandpa])
        .get_list()
        .await
        .unwrap();
    assert_eq!(names(&children), vec!["Daddy"]);

    let descendants = records
        .query::<Person>()
        .below(&[&grandpa])
        .order_by_insert()
        .get_list()
        .await
        .unwrap();
    assert_eq!(names(&descendants), vec!["Daddy", "Baby"]);

    let parents = records
        .query::<Person>()
        .parent_of(&[&baby])
        .order_by_indexed_field("age")
        .get_list()
        .await
        .unwrap();
    assert_eq!(names(&parents), vec!["Mummy", "Daddy"]);

    let ancestors = records
        .query::<Person>()
        .above(&[&baby])
        .count()
        .await
        .unwrap();
    assert_eq!(ancestors, 3);

    let shared = records
        .query::<Person>()
        .child_of(&[&daddy, &mummy])
        .get_list()
        .await
        .unwrap();
    assert_eq!(names(&shared), vec!["Baby"]);
}

#[tokio::test]
async fn test_any_connector_returns_each_record_once() {
    let (records, _temp) = create_test_records().await;
    let (daddy, mummy, baby) = create_family(&records).await;
    records.add_children(&daddy, &[&baby]).await.unwrap();
    records.add_children(&mummy, &[&baby]).await.unwrap();

    let below = records
        .query::<Person>()
        .below_any(&[&daddy, &mummy])
        .get_list()
        .await
        .unwrap();
    assert_eq!(names(&below), vec!["Baby"]);

    let count = records
        .query::<Person>()
        .child_of_any(&[&daddy, &mummy])
        .count()
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_empty_connector_matches_nothing() {
    let (records, _temp) = create_test_records().await;
    create_family(&records).await;
    let none: [&Person; 0] = [];

    let result = records.query::<Person>().below(&none).get_list().await.unwrap();
    assert!(result.is_empty());
    let linked = records.query::<Person>().linking_any(&none).count().await.unwrap();
    assert_eq!(linked, 0);
}

#[tokio::test]
async fn test_builder_errors_surface_on_execution() {
    let (records, _temp) = create_test_records().await;
    let (daddy, mummy, _) = create_family(&records).await;

    let after_sort = records
        .query::<Person>()
        .order_by_insert()
        .index_equal_to("age", 30)
        .get_list()
        .await;
    assert!(matches!(after_sort, Err(RecordError::IllegalState(_))));

    let two_connectors = records
        .query::<Person>()
        .child_of(&[&daddy])
        .linking(&[&mummy])
        .count()
        .await;
    assert!(matches!(two_connectors, Err(RecordError::IllegalState(_))));

    let no_link = records
        .query::<Person>()
        .attribute_equal_to("x")
        .get_list()
        .await;
    assert!(matches!(no_link, Err(RecordError::IllegalState(_))));

    let unknown_field = records
        .query::<Person>()
        .index_equal_to("height", 180)
        .get_list()
        .await;
    assert!(matches!(unknown_field, Err(RecordError::IllegalState(_))));

    let null_value = records
        .query::<Person>()
        .index_equal_to("age", None::<u32>)
        .get_list()
        .await;
    assert!(matches!(null_value, Err(RecordError::IllegalState(_))));

    let unsaved = Person::new("Ghost", 1);
    let unsaved_target = records
        .query::<Person>()
        .child_of(&[&unsaved])
        .get_list()
        .await;
    assert!(matches!(unsaved_target, Err(RecordError::IllegalState(_))));
}

#[tokio::test]
async fn test_index_values_reach_index_list() {
    let (records, _temp) = create_test_records().await;
    create_family(&records).await;

    let ages = records.index_list_for::<Person>("age").await.unwrap();
    assert_eq!(
        ages,
        vec![
            Value::Numeric(Decimal::from(5)),
            Value::Numeric(Decimal::from(30)),
            Value::Numeric(Decimal::from(40)),
        ]
    );
}
