use crate::config::CandidateSelection;
use crate::domain::event::IncomingTicket;
use crate::domain::ticket::{Ticket, TicketId};

/// Exact-field predicate describing a duplicate of the incoming ticket.
#[derive(Clone, Copy, Debug)]
pub struct DuplicateCriteria<'a> {
    pub ticket_id: &'a TicketId,
    pub category: &'a str,
    pub pipeline: &'a str,
}

impl<'a> DuplicateCriteria<'a> {
    pub fn for_incoming(incoming: &'a IncomingTicket) -> Self {
        Self {
            ticket_id: &incoming.ticket_id,
            category: &incoming.category,
            pipeline: &incoming.pipeline,
        }
    }

    pub fn matches(&self, ticket: &Ticket) -> bool {
        ticket.id != *self.ticket_id
            && ticket.is_open
            && ticket.category == self.category
            && ticket.pipeline == self.pipeline
    }
}

/// Tickets matching the criteria, in fetch order.
pub fn duplicate_candidates<'t>(
    tickets: &'t [Ticket],
    criteria: &DuplicateCriteria<'_>,
) -> Vec<&'t Ticket> {
    tickets.iter().filter(|ticket| criteria.matches(ticket)).collect()
}

/// Picks the ticket that survives the merge.
///
/// `OldestCreated` prefers tickets with a parseable creation date; ties and
/// undated tickets keep their fetch order.
pub fn select_target<'t>(
    candidates: &[&'t Ticket],
    selection: CandidateSelection,
) -> Option<&'t Ticket> {
    match selection {
        CandidateSelection::FetchOrder => candidates.first().copied(),
        CandidateSelection::OldestCreated => candidates
            .iter()
            .enumerate()
            .min_by_key(|(index, ticket)| {
                let created = ticket.created_at_utc();
                (created.is_none(), created, *index)
            })
            .map(|(_, ticket)| *ticket),
    }
}

#[cfg(test)]
mod tests {
    use crate::config::CandidateSelection;
    use crate::domain::ticket::{Ticket, TicketId};

    use super::{duplicate_candidates, select_target, DuplicateCriteria};

    fn ticket(id: &str, open: bool, category: &str, pipeline: &str, created: Option<&str>) -> Ticket {
        Ticket {
            id: TicketId(id.to_string()),
            is_open: open,
            category: category.to_string(),
            pipeline: pipeline.to_string(),
            description: format!("description of {id}"),
            created_at: created.map(str::to_string),
        }
    }

    #[test]
    fn keeps_only_open_tickets_with_same_category_and_pipeline() {
        let tickets = vec![
            ticket("T1", true, "payment", "P1", None),
            ticket("T2", false, "payment", "P1", None),
            ticket("T3", true, "sales", "P1", None),
            ticket("T5", true, "payment", "P2", None),
        ];
        let incoming = TicketId("T4".to_string());
        let criteria = DuplicateCriteria { ticket_id: &incoming, category: "payment", pipeline: "P1" };

        let candidates = duplicate_candidates(&tickets, &criteria);
        let ids: Vec<&str> = candidates.iter().map(|ticket| ticket.id.0.as_str()).collect();
        assert_eq!(ids, vec!["T1"]);
    }

    #[test]
    fn a_ticket_is_never_its_own_duplicate() {
        let tickets = vec![ticket("T4", true, "payment", "P1", None)];
        let incoming = TicketId("T4".to_string());
        let criteria = DuplicateCriteria { ticket_id: &incoming, category: "payment", pipeline: "P1" };

        assert!(duplicate_candidates(&tickets, &criteria).is_empty());
    }

    #[test]
    fn category_match_is_exact() {
        let tickets = vec![ticket("T1", true, "Payment", "P1", None)];
        let incoming = TicketId("T4".to_string());
        let criteria = DuplicateCriteria { ticket_id: &incoming, category: "payment", pipeline: "P1" };

        assert!(duplicate_candidates(&tickets, &criteria).is_empty());
    }

    #[test]
    fn fetch_order_selection_takes_first_candidate() {
        let tickets = vec![
            ticket("T7", true, "payment", "P1", Some("2024-05-01T00:00:00Z")),
            ticket("T1", true, "payment", "P1", Some("2023-01-01T00:00:00Z")),
        ];
        let candidates: Vec<&Ticket> = tickets.iter().collect();

        let target = select_target(&candidates, CandidateSelection::FetchOrder).expect("target");
        assert_eq!(target.id.0, "T7");
    }

    #[test]
    fn oldest_created_selection_prefers_dated_tickets() {
        let tickets = vec![
            ticket("T9", true, "payment", "P1", None),
            ticket("T7", true, "payment", "P1", Some("2024-05-01T00:00:00Z")),
            ticket("T1", true, "payment", "P1", Some("2023-01-01T00:00:00.000Z")),
            ticket("T2", true, "payment", "P1", Some("2023-01-01T00:00:00Z")),
        ];
        let candidates: Vec<&Ticket> = tickets.iter().collect();

        let target = select_target(&candidates, CandidateSelection::OldestCreated).expect("target");
        assert_eq!(target.id.0, "T1");
    }

    #[test]
    fn selection_on_empty_candidates_is_none() {
        assert!(select_target(&[], CandidateSelection::OldestCreated).is_none());
    }
}
