use kv_batch::{BoundCondition, Client, Error, Key, TikvStore, is_not_found};

#[derive(kv_batch::Entity, Clone, PartialEq, ::prost::Message)]
#[entity(kind = "User")]
pub struct UserInfo {
    #[entity(id)]
    #[index]
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,

    #[index]
    #[prost(int32, tag = "2")]
    pub age: i32,

    #[prost(string, tag = "3")]
    pub email: ::prost::alloc::string::String,
}

#[derive(kv_batch::Entity, Clone, PartialEq, ::prost::Message)]
pub struct Note {
    #[entity(id)]
    #[prost(int64, tag = "1")]
    pub id: i64,

    #[entity(parent)]
    #[prost(message, optional, tag = "2")]
    pub owner: Option<Key>,

    #[prost(string, tag = "3")]
    pub text: ::prost::alloc::string::String,
}

fn main() -> Result<(), Error> {
    env_logger::init();

    let pd = std::env::var("PD_ENDPOINTS").unwrap_or_else(|_| "127.0.0.1:2379".to_string());
    let client = Client::new(TikvStore::connect(pd.split(',').map(String::from).collect())?);

    let mut users = vec![
        UserInfo {
            name: "Alice".to_string(),
            age: 25,
            email: "alice@example.com".to_string(),
        },
        UserInfo {
            name: "Bob".to_string(),
            age: 31,
            email: "bob@example.com".to_string(),
        },
    ];
    let keys = client.put_all(&mut users)?;
    println!("stored {:?}", keys);

    let mut note = Note {
        owner: Some(keys[0].clone()),
        text: "hello".to_string(),
        ..Default::default()
    };
    let note_key = client.put(&mut note)?;
    println!("note {} got id {}", note_key, note.id);

    let query = client
        .query::<UserInfo>()?
        .filter("age", BoundCondition::Range(UserInfo::encode_age(20), UserInfo::encode_age(30)));
    let mut found = Vec::new();
    client.get_all_by_query(&query, Some(&mut found))?;
    println!("{:?}", found);

    client.delete_all(&keys)?;
    client.delete(&note_key)?;

    let mut missing = [UserInfo {
        name: "Alice".to_string(),
        ..Default::default()
    }];
    if let Err(err) = client.get_all(&mut missing) {
        println!("Alice removed: {}", is_not_found(&err, 0));
    }

    Ok(())
}
