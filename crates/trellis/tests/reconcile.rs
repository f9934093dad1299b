use trellis::diff::{function_delta, table_delta};
use trellis::schema::{CascadeAction, Function, IndexMethod, SchemaObject, Table};
use trellis::{
    AutoCreate, MigrationPlan, ObjectName, PlannedObject, PostgresVersion, SchemaPatchDifference,
    TypeRegistry,
};

const NEXT_HI_BODY: &str = r#"
CREATE OR REPLACE FUNCTION functions.mt_get_next_hi(entity varchar) RETURNS integer AS
$$
DECLARE
    current_value bigint;
    next_value bigint;
BEGIN
    select hi_value into current_value from functions.mt_hilo where entity_name = entity;
    IF current_value is null THEN
        insert into functions.mt_hilo (entity_name, hi_value) values (entity, 0);
        next_value := 0;
    ELSE
        next_value := current_value + 1;
        update functions.mt_hilo set hi_value = next_value where entity_name = entity and hi_value = current_value;

        IF NOT FOUND THEN
            next_value := -1;
        END IF;
    END IF;

    return next_value;
END

$$ LANGUAGE plpgsql;
"#;

fn states() -> Table {
    let mut states = Table::new("tables.states");
    states.add_column("id", "integer").primary_key();
    states
}

fn people(states: &Table) -> Table {
    let mut people = Table::new("tables.people");
    people.add_column("id", "integer").primary_key();
    people.add_column("first_name", "text");
    people
        .add_column("last_name", "text")
        .add_index_with(|idx| idx.method = IndexMethod::Hash);
    people
        .add_column("state_id", "integer")
        .foreign_key_to_with(states, "id", |fk| {
            fk.on_delete = CascadeAction::Cascade;
            fk.on_update = CascadeAction::Restrict;
        });
    people
}

fn plan_fresh(mode: AutoCreate, objects: &[SchemaObject]) -> MigrationPlan {
    let registry = TypeRegistry::new();
    let planned: Vec<PlannedObject<'_>> = objects
        .iter()
        .map(|desired| {
            let delta = match desired {
                SchemaObject::Table(table) => table_delta(&registry, table, None),
                SchemaObject::Function(function) => function_delta(&registry, function, None),
            };
            PlannedObject { desired, existing: None, delta }
        })
        .collect();
    MigrationPlan::from_deltas(mode, PostgresVersion::from_version_num(160002), planned)
}

#[test]
fn full_schema_plans_in_dependency_order() {
    let states = states();
    let people = people(&states);
    let function = Function::from_sql(NEXT_HI_BODY).unwrap();

    // listed in the worst possible order on purpose
    let objects = vec![
        SchemaObject::from(people),
        SchemaObject::from(function),
        SchemaObject::from(states),
    ];

    let plan = plan_fresh(AutoCreate::CreateOrUpdate, &objects);
    let sql: Vec<&str> = plan.statements().iter().map(|s| s.sql.as_str()).collect();

    let position = |needle: &str| {
        sql.iter()
            .position(|s| s.contains(needle))
            .unwrap_or_else(|| panic!("no statement containing {needle:?}"))
    };

    // every table exists before any foreign key is attached
    assert!(position("CREATE TABLE tables.states") < position("ADD CONSTRAINT fkey_people_state_id"));
    assert!(position("CREATE TABLE tables.people") < position("ADD CONSTRAINT fkey_people_state_id"));
    // a table's own index follows its creation
    assert!(position("CREATE TABLE tables.people") < position("idx_people_last_name"));
    // the function body is planned verbatim
    assert!(sql.iter().any(|s| s.contains("mt_get_next_hi")));
    // cascade actions survive into the generated constraint
    let fk = &sql[position("ADD CONSTRAINT fkey_people_state_id")];
    assert!(fk.contains("ON DELETE CASCADE"));
    assert!(fk.contains("ON UPDATE RESTRICT"));
}

#[test]
fn reflexive_deltas_plan_nothing() {
    let registry = TypeRegistry::new();
    let states = states();
    let people = people(&states);

    for table in [&states, &people] {
        let delta = table_delta(&registry, table, Some(table));
        assert_eq!(delta.difference, SchemaPatchDifference::None);
    }

    let function = Function::from_sql(NEXT_HI_BODY).unwrap();
    let delta = function_delta(&registry, &function, Some(&function));
    assert_eq!(delta.difference, SchemaPatchDifference::None);

    let objects = vec![SchemaObject::from(states.clone())];
    let planned = vec![PlannedObject {
        desired: &objects[0],
        existing: Some(SchemaObject::Table(states.clone())),
        delta: table_delta(&registry, &states, Some(&states)),
    }];
    let plan = MigrationPlan::from_deltas(
        AutoCreate::CreateOrUpdate,
        PostgresVersion::from_version_num(160002),
        planned,
    );
    assert!(plan.is_empty());
}

#[test]
fn absent_objects_classify_as_create() {
    let registry = TypeRegistry::new();
    let states = states();
    assert_eq!(
        table_delta(&registry, &states, None).difference,
        SchemaPatchDifference::Create
    );
    let function = Function::from_sql(NEXT_HI_BODY).unwrap();
    assert_eq!(
        function_delta(&registry, &function, None).difference,
        SchemaPatchDifference::Create
    );
}

#[test]
fn scenario_hi_function_drop_statements() {
    let function = Function::from_sql(NEXT_HI_BODY).unwrap();
    assert_eq!(
        function.identifier(),
        &ObjectName::new("functions", "mt_get_next_hi")
    );
    assert_eq!(
        function.drop_statements(),
        vec!["drop function functions.mt_get_next_hi(varchar);".to_string()]
    );

    let from_catalog = SchemaObject::from(function);
    assert_eq!(from_catalog.identifier().name(), "mt_get_next_hi");
}

#[test]
fn multi_column_foreign_keys_keep_positional_correspondence() {
    let mut states = Table::new("tables.states");
    states.add_column("id", "integer").primary_key();
    states.add_column("tenant_id", "varchar").primary_key();

    let mut people = Table::new("tables.people");
    people.add_column("id", "integer").primary_key();
    people.add_column("tenant_id", "varchar");
    people.add_column("state_id", "integer");
    {
        let mut fk = trellis::schema::ForeignKey::new(
            "fkey_people_state_id_tenant_id",
            states.identifier().clone(),
        );
        fk.column_names = vec!["state_id".to_string(), "tenant_id".to_string()];
        fk.linked_names = vec!["id".to_string(), "tenant_id".to_string()];
        people.add_foreign_key(fk);
    }

    let plan = plan_fresh(AutoCreate::CreateOrUpdate, &[SchemaObject::from(people)]);
    let fk_sql = plan
        .statements()
        .iter()
        .find(|s| s.sql.contains("ADD CONSTRAINT"))
        .expect("plan contains the foreign key");
    assert_eq!(
        fk_sql.sql,
        "ALTER TABLE tables.people ADD CONSTRAINT fkey_people_state_id_tenant_id \
         FOREIGN KEY (state_id, tenant_id) REFERENCES tables.states (id, tenant_id);"
    );
}
